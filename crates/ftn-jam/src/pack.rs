//! Base compaction and reply-thread linking.
//!
//! Both operations hold the cross-process lock for their whole run. Pack
//! rewrites `.jhr`/`.jdt`/`.jdx` through temporary siblings and renames
//! them into place; `.jlr` is never touched, which is what lets the
//! high-water mark survive a pack.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use binrw::prelude::*;

use crate::base::{BaseInner, MessageBase};
use crate::lock::{BaseLock, sibling};
use crate::records::IndexRecord;
use crate::{JamError, Result};

/// Counters reported by [`MessageBase::pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStats {
    /// In-file messages before the pack, deleted ones included.
    pub before: u32,
    /// Messages surviving the pack.
    pub after: u32,
    /// Deleted messages (and index holes) dropped.
    pub removed: u32,
}

impl MessageBase {
    /// Compacts the base: deleted messages and index holes are dropped,
    /// survivors are renumbered and their text is rewritten contiguously.
    ///
    /// Reply links are reset to zero; run [`MessageBase::link`] afterwards
    /// to rebuild them.
    pub fn pack(&self) -> Result<PackStats> {
        let _lock = BaseLock::acquire(self.base_path())?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        let tmp_paths: Vec<PathBuf> = [".jhr.tmp", ".jdt.tmp", ".jdx.tmp"]
            .into_iter()
            .map(|ext| sibling(self.base_path(), ext))
            .collect();

        let stats = match write_packed_files(&inner, &tmp_paths) {
            Ok(stats) => stats,
            Err(e) => {
                for path in &tmp_paths {
                    let _ = fs::remove_file(path);
                }
                return Err(e);
            }
        };

        // Swap the temporaries into place. A failure after the first rename
        // is the one genuinely dangerous window; the originals are never
        // removed before their replacement is in place.
        for (tmp, ext) in tmp_paths.iter().zip([".jhr", ".jdt", ".jdx"]) {
            if let Err(e) = fs::rename(tmp, sibling(self.base_path(), ext)) {
                log::error!(
                    "pack of {} failed mid-swap ({e}); temporaries left for manual recovery",
                    self.base_path().display()
                );
                match BaseInner::open_files(self.base_path()) {
                    Ok(reopened) => *inner = reopened,
                    Err(_) => inner.poisoned = true,
                }
                let _ = inner.refresh_fixed();
                return Err(JamError::Io(e));
            }
        }

        match BaseInner::open_files(self.base_path()) {
            Ok(reopened) => *inner = reopened,
            Err(e) => {
                inner.poisoned = true;
                return Err(e);
            }
        }
        inner.refresh_fixed()?;

        log::info!(
            "packed {}: {} -> {} messages",
            self.base_path().display(),
            stats.before,
            stats.after
        );
        Ok(stats)
    }

    /// Rebuilds `reply_to` / `reply_first` / `reply_next` for every message
    /// from flat MSGID/REPLYID maps. Returns the number of headers
    /// rewritten.
    ///
    /// Working from maps rather than following stored links keeps malformed
    /// input with cyclic reply chains from looping the pass.
    pub fn link(&self) -> Result<u32> {
        use std::collections::HashMap;

        let _lock = BaseLock::acquire(self.base_path())?;
        let mut inner = self.write_guard()?;
        inner.refresh_fixed()?;

        struct Entry {
            msg_num: u32,
            hdr_offset: u32,
            header: crate::records::MessageHeader,
            msg_id: String,
            reply_id: String,
        }

        let count = inner.count()?;
        let mut entries = Vec::new();
        for msg_num in 1..=count {
            let (index, header) = match inner.read_header(msg_num) {
                Ok(pair) => pair,
                Err(JamError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            if header.is_deleted() {
                continue;
            }
            let msg_id = header
                .subfield_text(crate::records::SubfieldId::MSG_ID)
                .unwrap_or_default();
            let reply_id = header
                .subfield_text(crate::records::SubfieldId::REPLY_ID)
                .unwrap_or_default();
            entries.push(Entry {
                msg_num,
                hdr_offset: index.hdr_offset,
                header,
                msg_id,
                reply_id,
            });
        }

        // Pass 1: flat lookup maps. The first message with a given MSGID
        // wins; a MSGID of the form `addr unique` is also indexed by its
        // address prefix.
        let mut by_msgid: HashMap<&str, u32> = HashMap::new();
        let mut by_msgid_prefix: HashMap<&str, u32> = HashMap::new();
        let mut by_replyid: HashMap<&str, Vec<u32>> = HashMap::new();
        for entry in &entries {
            if !entry.msg_id.is_empty() {
                by_msgid.entry(&entry.msg_id).or_insert(entry.msg_num);
                if let Some((addr, _)) = entry.msg_id.split_once(' ') {
                    by_msgid_prefix.entry(addr).or_insert(entry.msg_num);
                }
            }
            if !entry.reply_id.is_empty() {
                by_replyid
                    .entry(&entry.reply_id)
                    .or_default()
                    .push(entry.msg_num);
            }
        }

        // Pass 2: desired link values per entry.
        let mut desired = Vec::with_capacity(entries.len());
        for entry in &entries {
            let reply_to = if entry.reply_id.is_empty() {
                0
            } else {
                by_msgid
                    .get(entry.reply_id.as_str())
                    .or_else(|| by_msgid_prefix.get(entry.reply_id.as_str()))
                    .copied()
                    .unwrap_or(0)
            };

            let mut children: Vec<u32> = Vec::new();
            if !entry.msg_id.is_empty() {
                if let Some(nums) = by_replyid.get(entry.msg_id.as_str()) {
                    children.extend_from_slice(nums);
                }
                if let Some((addr, _)) = entry.msg_id.split_once(' ') {
                    if let Some(nums) = by_replyid.get(addr) {
                        children.extend_from_slice(nums);
                    }
                }
                children.sort_unstable();
                children.dedup();
            }
            let reply_first = children.first().copied().unwrap_or(0);

            let mut reply_next = 0;
            if !entry.reply_id.is_empty() {
                if let Some(siblings) = by_replyid.get(entry.reply_id.as_str()) {
                    if let Some(pos) = siblings.iter().position(|&n| n == entry.msg_num) {
                        reply_next = siblings.get(pos + 1).copied().unwrap_or(0);
                    }
                }
            }

            desired.push((reply_to, reply_first, reply_next));
        }

        let mut changed = 0;
        for (entry, (reply_to, reply_first, reply_next)) in entries.iter().zip(desired) {
            let header = &entry.header;
            if header.reply_to == reply_to
                && header.reply_first == reply_first
                && header.reply_next == reply_next
            {
                continue;
            }
            let mut updated = header.clone();
            updated.reply_to = reply_to;
            updated.reply_first = reply_first;
            updated.reply_next = reply_next;

            inner
                .header
                .seek(SeekFrom::Start(entry.hdr_offset as u64))?;
            updated.write_le(&mut inner.header)?;
            changed += 1;
        }

        if changed > 0 {
            inner.fixed.mod_counter += 1;
            inner.write_fixed()?;
            inner.header.sync_all()?;
            log::trace!("linked {}: {changed} headers updated", self.base_path().display());
        }
        Ok(changed)
    }
}

/// Writes the compacted `.jhr`/`.jdt`/`.jdx` temporaries and returns the
/// resulting counters. The live files are only read.
fn write_packed_files(inner: &BaseInner, tmp_paths: &[PathBuf]) -> Result<PackStats> {
    let mut new_header = File::create(&tmp_paths[0])?;
    let mut new_text = File::create(&tmp_paths[1])?;
    let mut new_index = File::create(&tmp_paths[2])?;

    let mut fixed = inner.fixed.clone();
    fixed.active_msgs = 0;
    fixed.mod_counter += 1;
    fixed.write_le(&mut new_header)?;

    let count = inner.count()?;
    let mut kept = 0u32;
    for msg_num in 1..=count {
        let index = match inner.read_index(msg_num) {
            Ok(index) => index,
            Err(JamError::NotFound) => continue,
            Err(e) => return Err(e),
        };
        let mut header = inner.read_header_at(index.hdr_offset as u64)?;
        if header.is_deleted() {
            continue;
        }

        let mut text = vec![0u8; header.text_len as usize];
        inner.text.read_exact_at(&mut text, header.text_offset as u64)?;
        let new_text_offset = new_text.stream_position()?;
        new_text.write_all(&text)?;

        kept += 1;
        header.text_offset = new_text_offset as u32;
        header.reply_to = 0;
        header.reply_first = 0;
        header.reply_next = 0;
        header.message_number = fixed.base_msg_num + kept - 1;

        let hdr_offset = new_header.stream_position()?;
        header.write_le(&mut new_header)?;
        IndexRecord {
            to_crc: index.to_crc,
            hdr_offset: hdr_offset as u32,
        }
        .write_le(&mut new_index)?;
    }

    fixed.active_msgs = kept;
    new_header.seek(SeekFrom::Start(0))?;
    fixed.write_le(&mut new_header)?;

    new_header.sync_all()?;
    new_text.sync_all()?;
    new_index.sync_all()?;

    Ok(PackStats {
        before: count,
        after: kept,
        removed: count - kept,
    })
}
