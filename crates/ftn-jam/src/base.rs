//! The message-base handle and its read/write operations.
//!
//! Every mutating operation takes the `.bsy` cross-process lock, then the
//! in-memory writer lock, and refreshes the fixed header from disk before
//! touching anything. Pure reads take the reader lock only and use
//! positioned reads, so concurrent readers never disturb each other.
//!
//! The index-record append is the last step of a message write, so a write
//! that dies halfway leaves dangling bytes but no visible message.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use binrw::prelude::*;
use time::OffsetDateTime;

use ftn_msg::crc32_jam;
use ftn_msg::packet::{bytes_to_text, text_to_bytes};

use crate::lock::{BaseLock, sibling};
use crate::message::{Message, MessageKind, origin_address_from_text};
use crate::records::{
    FIXED_HEADER_SIZE, FixedHeader, INDEX_RECORD_SIZE, IndexRecord, LASTREAD_RECORD_SIZE, LastRead,
    MessageAttributes, MessageHeader, SubfieldId,
};
use crate::{HWM_USER, JamError};

/// Product identifier written into PID/TID kludges and tearlines.
pub const PRODUCT_ID: &str = "hub-rs 0.3.0";

/// Summary counters for a base, for maintenance tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseStats {
    /// In-file message count, deleted ones included.
    pub messages: u32,
    /// Non-deleted message count.
    pub active: u32,
    pub base_msg_num: u32,
    pub mod_counter: u32,
}

/// An open JAM base.
///
/// The handle is shareable across threads; see the module docs for the
/// locking discipline.
pub struct MessageBase {
    base_path: PathBuf,
    inner: RwLock<BaseInner>,
}

pub(crate) struct BaseInner {
    pub(crate) header: File,
    pub(crate) text: File,
    pub(crate) index: File,
    pub(crate) lastread: File,
    pub(crate) fixed: FixedHeader,
    /// Set when a failed pack leaves the handle unusable.
    pub(crate) poisoned: bool,
}

pub(crate) fn unix_now() -> u32 {
    OffsetDateTime::now_utc().unix_timestamp().max(0) as u32
}

fn from_unix(secs: u32) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs as i64).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl MessageBase {
    /// Opens the base at the given path prefix, creating or recreating the
    /// four files when they are missing, short or carry a bad signature.
    pub fn open(base_path: impl AsRef<Path>) -> crate::Result<MessageBase> {
        let base_path = base_path.as_ref().to_path_buf();
        if let Some(parent) = base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if !Self::files_intact(&base_path) {
            Self::create_files(&base_path)?;
            log::info!("created JAM base {}", base_path.display());
        }

        let mut inner = BaseInner::open_files(&base_path)?;
        if let Err(e) = inner.refresh_fixed() {
            match e {
                JamError::InvalidSignature | JamError::Layout(_) => {
                    log::warn!(
                        "JAM base {} has an invalid fixed header, recreating",
                        base_path.display()
                    );
                    drop(inner);
                    Self::create_files(&base_path)?;
                    inner = BaseInner::open_files(&base_path)?;
                    inner.refresh_fixed()?;
                }
                other => return Err(other),
            }
        }

        Ok(MessageBase {
            base_path,
            inner: RwLock::new(inner),
        })
    }

    fn files_intact(base_path: &Path) -> bool {
        let jhr_ok = fs::metadata(sibling(base_path, ".jhr"))
            .map(|m| m.len() >= FIXED_HEADER_SIZE)
            .unwrap_or(false);
        jhr_ok
            && sibling(base_path, ".jdt").exists()
            && sibling(base_path, ".jdx").exists()
            && sibling(base_path, ".jlr").exists()
    }

    fn create_files(base_path: &Path) -> crate::Result<()> {
        for ext in [".jhr", ".jdt", ".jdx", ".jlr"] {
            let _ = fs::remove_file(sibling(base_path, ext));
        }
        let mut header = File::create(sibling(base_path, ".jhr"))?;
        FixedHeader::new(unix_now()).write_le(&mut header)?;
        header.sync_all()?;
        for ext in [".jdt", ".jdx", ".jlr"] {
            File::create(sibling(base_path, ext))?.sync_all()?;
        }
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub(crate) fn read_guard(&self) -> crate::Result<RwLockReadGuard<'_, BaseInner>> {
        let guard = self.inner.read().map_err(|_| JamError::BaseNotOpen)?;
        if guard.poisoned {
            return Err(JamError::BaseNotOpen);
        }
        Ok(guard)
    }

    pub(crate) fn write_guard(&self) -> crate::Result<RwLockWriteGuard<'_, BaseInner>> {
        let guard = self.inner.write().map_err(|_| JamError::BaseNotOpen)?;
        if guard.poisoned {
            return Err(JamError::BaseNotOpen);
        }
        Ok(guard)
    }

    /// In-file message count, deleted messages included.
    pub fn count(&self) -> crate::Result<u32> {
        self.read_guard()?.count()
    }

    /// Non-deleted message count, from the on-disk fixed header.
    pub fn active_messages(&self) -> crate::Result<u32> {
        Ok(self.read_guard()?.fixed_snapshot()?.active_msgs)
    }

    pub fn base_message_number(&self) -> crate::Result<u32> {
        Ok(self.read_guard()?.fixed_snapshot()?.base_msg_num)
    }

    pub fn stats(&self) -> crate::Result<BaseStats> {
        let inner = self.read_guard()?;
        let fixed = inner.fixed_snapshot()?;
        Ok(BaseStats {
            messages: inner.count()?,
            active: fixed.active_msgs,
            base_msg_num: fixed.base_msg_num,
            mod_counter: fixed.mod_counter,
        })
    }

    pub fn read_index_record(&self, msg_num: u32) -> crate::Result<IndexRecord> {
        self.read_guard()?.read_index(msg_num)
    }

    pub fn read_message_header(&self, msg_num: u32) -> crate::Result<MessageHeader> {
        let inner = self.read_guard()?;
        Ok(inner.read_header(msg_num)?.1)
    }

    pub fn read_message_text(&self, header: &MessageHeader) -> crate::Result<String> {
        self.read_guard()?.read_text(header)
    }

    /// Reads a full message: header, text, and subfields assembled into the
    /// public view.
    pub fn read_message(&self, msg_num: u32) -> crate::Result<Message> {
        let inner = self.read_guard()?;
        let (_, header) = inner.read_header(msg_num)?;
        let text = inner.read_text(&header)?;
        drop(inner);
        Ok(assemble_message(&header, text))
    }

    /// Yields non-deleted messages from `start` upward, at most `max` of
    /// them (0 means unbounded).
    pub fn scan_messages(&self, start: u32, max: u32) -> crate::Result<Vec<(u32, Message)>> {
        let count = self.count()?;
        let mut out = Vec::new();
        for msg_num in start.max(1)..=count {
            if max != 0 && out.len() as u32 >= max {
                break;
            }
            let header = match self.read_message_header(msg_num) {
                Ok(h) => h,
                Err(JamError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            if header.is_deleted() {
                continue;
            }
            out.push((msg_num, self.read_message(msg_num)?));
        }
        Ok(out)
    }

    /// Appends a locally entered message. Subfields are written for every
    /// non-empty field; nothing is synthesized.
    pub fn write_message(&self, msg: &Message) -> crate::Result<u32> {
        self.write_message_ext(msg, MessageKind::Local, "", "", "")
    }

    /// The primary write path.
    ///
    /// For echomail this synthesizes a MSGID when missing, adds AREA/PID/TID
    /// kludges, and appends tearline and origin lines to the text. SEEN-BY
    /// and PATH are the tosser's concern, not this function's.
    ///
    /// Echomail and netmail leave `date_processed` at 0, which marks the
    /// message as pending export; local messages are stamped immediately.
    pub fn write_message_ext(
        &self,
        msg: &Message,
        kind: MessageKind,
        echo_tag: &str,
        bbs_name: &str,
        tearline: &str,
    ) -> crate::Result<u32> {
        let _lock = BaseLock::acquire(&self.base_path)?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        let kind_flags = match kind {
            MessageKind::Local => MessageAttributes::new().with_local(true).with_type_local(true),
            MessageKind::Echomail => MessageAttributes::new().with_local(true).with_type_echo(true),
            MessageKind::Netmail => MessageAttributes::new().with_local(true).with_type_net(true),
        };
        let attributes = msg.attributes.merged_with(kind_flags);

        let mut msg_id = msg.msg_id.clone();
        if kind == MessageKind::Echomail && msg_id.is_empty() {
            if let Some(orig) = msg.orig_addr {
                let serial = inner.next_msg_serial()?;
                msg_id = format!("{orig} {serial:08x}");
            }
        }

        let mut text = msg.text.clone();
        if kind == MessageKind::Echomail && !bbs_name.is_empty() {
            if let Some(orig) = msg.orig_addr {
                if !text.is_empty() && !text.ends_with('\r') {
                    text.push('\r');
                }
                let tearline = if tearline.is_empty() { PRODUCT_ID } else { tearline };
                text.push_str(&format!("--- {tearline}\r"));
                text.push_str(&format!(" * Origin: {bbs_name} ({orig})\r"));
            }
        }

        let now = unix_now();
        let mut header = MessageHeader {
            msgid_crc: crc32_jam(&msg_id),
            reply_crc: crc32_jam(&msg.reply_id),
            date_written: match msg.written.unix_timestamp() {
                t if t > 0 => t as u32,
                _ => now,
            },
            date_processed: match kind {
                MessageKind::Local => now,
                MessageKind::Echomail | MessageKind::Netmail => 0,
            },
            attributes,
            ..Default::default()
        };

        if let Some(orig) = msg.orig_addr {
            header.push_text(SubfieldId::ORIG_ADDRESS, &orig.to_string());
        }
        if kind != MessageKind::Echomail {
            if let Some(dest) = msg.dest_addr {
                header.push_text(SubfieldId::DEST_ADDRESS, &dest.to_string());
            }
        }
        header.push_text(SubfieldId::SENDER_NAME, &msg.from);
        header.push_text(SubfieldId::RECEIVER_NAME, &msg.to);
        header.push_text(SubfieldId::SUBJECT, &msg.subject);
        header.push_text(SubfieldId::MSG_ID, &msg_id);
        header.push_text(SubfieldId::REPLY_ID, &msg.reply_id);
        if kind == MessageKind::Echomail {
            if !echo_tag.is_empty() {
                header.push_text(SubfieldId::FTS_KLUDGE, &format!("AREA:{echo_tag}"));
            }
            let pid = if msg.pid.is_empty() { PRODUCT_ID } else { msg.pid.as_str() };
            header.push_text(SubfieldId::FTS_KLUDGE, &format!("PID: {pid}"));
            header.push_text(SubfieldId::FTS_KLUDGE, &format!("TID: {PRODUCT_ID}"));
        } else {
            header.push_text(SubfieldId::PID, &msg.pid);
        }
        header.push_text(SubfieldId::FLAGS, &msg.flags);
        for kludge in &msg.kludges {
            header.push_text(SubfieldId::FTS_KLUDGE, kludge);
        }
        header.push_text(SubfieldId::SEEN_BY_2D, &msg.seen_by);
        header.push_text(SubfieldId::PATH_2D, &msg.path);

        let count = inner.count()?;
        header.message_number = inner.fixed.base_msg_num + count;

        let text_bytes = text_to_bytes(&text);
        let text_offset = inner.text.seek(SeekFrom::End(0))?;
        inner.text.write_all(&text_bytes)?;
        header.text_offset = text_offset as u32;
        header.text_len = text_bytes.len() as u32;

        let hdr_offset = inner.header.seek(SeekFrom::End(0))?;
        header.write_le(&mut inner.header)?;

        // Visibility step: the message exists once its index record lands.
        let record = IndexRecord {
            to_crc: crc32_jam(&msg.to),
            hdr_offset: hdr_offset as u32,
        };
        inner.index.seek(SeekFrom::End(0))?;
        record.write_le(&mut inner.index)?;

        inner.fixed.active_msgs += 1;
        inner.fixed.mod_counter += 1;
        inner.write_fixed()?;
        inner.sync_data()?;

        log::trace!(
            "wrote message {} to {} ({:?})",
            count + 1,
            self.base_path.display(),
            kind
        );
        Ok(count + 1)
    }

    /// Rewrites a message header in place. The subfields must be unchanged
    /// so the header keeps its on-disk size.
    pub fn update_message_header(&self, msg_num: u32, header: &MessageHeader) -> crate::Result<()> {
        let _lock = BaseLock::acquire(&self.base_path)?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        let index = inner.read_index(msg_num)?;
        inner.header.seek(SeekFrom::Start(index.hdr_offset as u64))?;
        header.write_le(&mut inner.header)?;
        inner.fixed.mod_counter += 1;
        inner.write_fixed()?;
        inner.header.sync_all()?;
        Ok(())
    }

    /// Flags a message as deleted and zeroes its text length. Bytes are
    /// reclaimed by [`MessageBase::pack`], not here.
    pub fn delete_message(&self, msg_num: u32) -> crate::Result<()> {
        let _lock = BaseLock::acquire(&self.base_path)?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        let (index, mut header) = inner.read_header(msg_num)?;
        if header.is_deleted() {
            return Ok(());
        }
        header.attributes.set_deleted(true);
        header.text_len = 0;

        inner.header.seek(SeekFrom::Start(index.hdr_offset as u64))?;
        header.write_le(&mut inner.header)?;
        inner.fixed.active_msgs = inner.fixed.active_msgs.saturating_sub(1);
        inner.fixed.mod_counter += 1;
        inner.write_fixed()?;
        inner.header.sync_all()?;
        Ok(())
    }

    pub fn get_last_read(&self, user: &str) -> crate::Result<Option<LastRead>> {
        let inner = self.read_guard()?;
        let crc = crc32_jam(user);
        Ok(inner
            .read_lastread_all()?
            .into_iter()
            .find(|r| r.user_crc == crc))
    }

    /// Updates a user's lastread record in place, appending when absent.
    pub fn set_last_read(
        &self,
        user: &str,
        user_id: u32,
        last_read: u32,
        high_read: u32,
    ) -> crate::Result<()> {
        let _lock = BaseLock::acquire(&self.base_path)?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        let crc = crc32_jam(user);
        let records = inner.read_lastread_all()?;
        let slot = records
            .iter()
            .position(|r| r.user_crc == crc)
            .unwrap_or(records.len());

        let record = LastRead {
            user_crc: crc,
            user_id,
            last_read,
            high_read,
        };
        inner
            .lastread
            .seek(SeekFrom::Start(slot as u64 * LASTREAD_RECORD_SIZE))?;
        record.write_le(&mut inner.lastread)?;
        inner.fixed.mod_counter += 1;
        inner.write_fixed()?;
        inner.lastread.sync_all()?;
        Ok(())
    }

    /// Next unread message for a user, or [`JamError::NotFound`] when they
    /// are caught up (or the base is empty).
    pub fn get_next_unread(&self, user: &str) -> crate::Result<u32> {
        let count = self.count()?;
        match self.get_last_read(user)? {
            None if count > 0 => Ok(1),
            None => Err(JamError::NotFound),
            Some(r) if r.last_read >= count => Err(JamError::NotFound),
            Some(r) => Ok((r.last_read + 1).min(count)),
        }
    }

    /// Advances a user's lastread pointer; the high-read mark only grows.
    pub fn mark_message_read(&self, user: &str, msg_num: u32) -> crate::Result<()> {
        let (user_id, high_read) = match self.get_last_read(user)? {
            Some(r) => (r.user_id, r.high_read.max(msg_num)),
            None => (0, msg_num),
        };
        self.set_last_read(user, user_id, msg_num, high_read)
    }

    /// The outbound scanner's high-water mark for this base; 0 when unset.
    pub fn hwm(&self) -> crate::Result<u32> {
        Ok(self
            .get_last_read(HWM_USER)?
            .map(|r| r.last_read)
            .unwrap_or(0))
    }

    /// Advances the high-water mark. The mark never moves backward.
    pub fn set_hwm(&self, msg_num: u32) -> crate::Result<()> {
        if msg_num <= self.hwm()? {
            return Ok(());
        }
        self.set_last_read(HWM_USER, 0, msg_num, msg_num)
    }

    /// Draws the next MSGID serial from the fixed-header counter.
    pub fn get_next_msg_serial(&self) -> crate::Result<u32> {
        let _lock = BaseLock::acquire(&self.base_path)?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;
        inner.next_msg_serial()
    }
}

impl BaseInner {
    pub(crate) fn open_files(base_path: &Path) -> crate::Result<BaseInner> {
        let open = |ext: &str| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(sibling(base_path, ext))
        };
        Ok(BaseInner {
            header: open(".jhr")?,
            text: open(".jdt")?,
            index: open(".jdx")?,
            lastread: open(".jlr")?,
            fixed: FixedHeader::new(0),
            poisoned: false,
        })
    }

    /// Re-reads the fixed header from disk; another process may have
    /// modified the base since we last held the lock.
    pub(crate) fn refresh_fixed(&mut self) -> crate::Result<()> {
        self.fixed = self.fixed_snapshot()?;
        Ok(())
    }

    pub(crate) fn fixed_snapshot(&self) -> crate::Result<FixedHeader> {
        let mut buf = vec![0u8; FIXED_HEADER_SIZE as usize];
        self.header
            .read_exact_at(&mut buf, 0)
            .map_err(|_| JamError::InvalidSignature)?;
        FixedHeader::read_le(&mut Cursor::new(&buf)).map_err(map_layout)
    }

    pub(crate) fn write_fixed(&mut self) -> crate::Result<()> {
        self.header.seek(SeekFrom::Start(0))?;
        self.fixed.write_le(&mut self.header)?;
        Ok(())
    }

    pub(crate) fn sync_data(&self) -> crate::Result<()> {
        self.header.sync_all()?;
        self.text.sync_all()?;
        self.index.sync_all()?;
        Ok(())
    }

    pub(crate) fn count(&self) -> crate::Result<u32> {
        Ok((self.index.metadata()?.len() / INDEX_RECORD_SIZE) as u32)
    }

    pub(crate) fn read_index(&self, msg_num: u32) -> crate::Result<IndexRecord> {
        let count = self.count()?;
        if msg_num == 0 || msg_num > count {
            return Err(JamError::InvalidMessage(msg_num));
        }
        let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
        self.index
            .read_exact_at(&mut buf, (msg_num as u64 - 1) * INDEX_RECORD_SIZE)?;
        let record = IndexRecord::read_le(&mut Cursor::new(&buf)).map_err(map_layout)?;
        if record.is_hole() {
            return Err(JamError::NotFound);
        }
        Ok(record)
    }

    pub(crate) fn read_header_at(&self, offset: u64) -> crate::Result<MessageHeader> {
        const PREFIX: usize = crate::records::MESSAGE_HEADER_PREFIX_SIZE as usize;
        let mut prefix = [0u8; PREFIX];
        self.header
            .read_exact_at(&mut prefix, offset)
            .map_err(|_| JamError::InvalidSignature)?;
        // Subfield-region length sits right after signature, revision and
        // the reserved word.
        let subfield_len = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]);

        let mut buf = vec![0u8; PREFIX + subfield_len as usize];
        self.header
            .read_exact_at(&mut buf, offset)
            .map_err(|_| JamError::InvalidSignature)?;
        MessageHeader::read_le(&mut Cursor::new(&buf)).map_err(map_layout)
    }

    pub(crate) fn read_header(&self, msg_num: u32) -> crate::Result<(IndexRecord, MessageHeader)> {
        let index = self.read_index(msg_num)?;
        if (index.hdr_offset as u64) < FIXED_HEADER_SIZE {
            return Err(JamError::InvalidMessage(msg_num));
        }
        let header = self.read_header_at(index.hdr_offset as u64)?;
        Ok((index, header))
    }

    pub(crate) fn read_text(&self, header: &MessageHeader) -> crate::Result<String> {
        if header.text_len == 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u8; header.text_len as usize];
        self.text
            .read_exact_at(&mut buf, header.text_offset as u64)?;
        Ok(bytes_to_text(&buf))
    }

    pub(crate) fn read_lastread_all(&self) -> crate::Result<Vec<LastRead>> {
        let len = self.lastread.metadata()?.len();
        let mut buf = vec![0u8; len as usize];
        self.lastread.read_exact_at(&mut buf, 0)?;
        buf.chunks_exact(LASTREAD_RECORD_SIZE as usize)
            .map(|chunk| LastRead::read_le(&mut Cursor::new(chunk)).map_err(map_layout))
            .collect()
    }

    /// Serial-counter variant for callers that already hold the lock.
    pub(crate) fn next_msg_serial(&mut self) -> crate::Result<u32> {
        let mut serial = self.fixed.msg_serial();
        if serial == 0 {
            serial = unix_now();
        }
        serial = serial.wrapping_add(1);
        self.fixed.set_msg_serial(serial);
        self.fixed.mod_counter += 1;
        self.write_fixed()?;
        Ok(serial)
    }
}

pub(crate) fn map_layout(e: binrw::Error) -> JamError {
    if matches!(e, binrw::Error::BadMagic { .. }) {
        JamError::InvalidSignature
    } else {
        JamError::Layout(e)
    }
}

/// Builds the public [`Message`] view from a header and its text.
fn assemble_message(header: &MessageHeader, text: String) -> Message {
    let mut msg = Message {
        written: from_unix(header.date_written),
        text,
        attributes: header.attributes,
        ..Default::default()
    };

    for subfield in &header.subfields {
        let value = subfield.text_value();
        match subfield.id {
            SubfieldId::ORIG_ADDRESS => {
                if msg.orig_addr.is_none() {
                    msg.orig_addr = value.trim().parse().ok();
                }
            }
            SubfieldId::DEST_ADDRESS => {
                if msg.dest_addr.is_none() {
                    msg.dest_addr = value.trim().parse().ok();
                }
            }
            SubfieldId::SENDER_NAME => msg.from = value,
            SubfieldId::RECEIVER_NAME => msg.to = value,
            SubfieldId::SUBJECT => msg.subject = value,
            SubfieldId::MSG_ID => {
                if msg.msg_id.is_empty() {
                    msg.msg_id = value;
                }
            }
            SubfieldId::REPLY_ID => {
                if msg.reply_id.is_empty() {
                    msg.reply_id = value;
                }
            }
            SubfieldId::PID => msg.pid = value,
            SubfieldId::FLAGS => msg.flags = value,
            SubfieldId::SEEN_BY_2D => {
                if msg.seen_by.is_empty() {
                    msg.seen_by = value;
                } else {
                    msg.seen_by.push(' ');
                    msg.seen_by.push_str(&value);
                }
            }
            SubfieldId::PATH_2D => {
                if msg.path.is_empty() {
                    msg.path = value;
                } else {
                    msg.path.push(' ');
                    msg.path.push_str(&value);
                }
            }
            SubfieldId::FTS_KLUDGE => {
                // PID and AREA kludges are views of data carried elsewhere:
                // PID feeds the pid field, AREA is implied by the base.
                if let Some(pid) = value.strip_prefix("PID:") {
                    if msg.pid.is_empty() {
                        msg.pid = pid.trim().to_string();
                    }
                } else if value.starts_with("AREA:") {
                    // dropped
                } else {
                    msg.kludges.push(value);
                }
            }
            _ => {}
        }
    }

    if msg.orig_addr.is_none()
        && (header.attributes.type_echo() || header.attributes.type_net())
    {
        msg.orig_addr = origin_address_from_text(&msg.text);
    }
    msg
}
