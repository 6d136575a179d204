//! On-disk record layouts for the JAM base files.
//!
//! Reference: JAM(mbp) revision 1. Everything is little-endian; the fixed
//! header and every message header open with the `"JAM\0"` signature.

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use ftn_msg::impl_binrw_bitfield;
use ftn_msg::packet::{bytes_to_text, text_to_bytes};

/// Size of the fixed header block at the start of `.jhr`.
pub const FIXED_HEADER_SIZE: u64 = 1024;

/// Size of the structured prefix of a message header, signature included.
pub const MESSAGE_HEADER_PREFIX_SIZE: u64 = 76;

/// Size of one `.jdx` index record.
pub const INDEX_RECORD_SIZE: u64 = 8;

/// Size of one `.jlr` lastread record.
pub const LASTREAD_RECORD_SIZE: u64 = 16;

const RESERVED_SIZE: usize = 1000;

/// The 1024-byte block at offset 0 of `.jhr`.
///
/// The first four reserved bytes hold the MSGID serial counter, little-
/// endian; the rest of the reserved area is kept verbatim.
#[binrw::binrw]
#[brw(little, magic = b"JAM\0")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHeader {
    /// Unix time the base was created.
    pub date_created: u32,
    /// Bumped on every write to the base.
    pub mod_counter: u32,
    /// Number of non-deleted messages.
    pub active_msgs: u32,
    /// CRC-32 of the base password, `0xFFFFFFFF` when none.
    pub password_crc: u32,
    /// Offset added to in-file message numbers to form display numbers.
    pub base_msg_num: u32,
    #[br(count = RESERVED_SIZE)]
    #[brw(assert(reserved.len() == RESERVED_SIZE))]
    pub reserved: Vec<u8>,
}

impl FixedHeader {
    pub fn new(now_unix: u32) -> Self {
        FixedHeader {
            date_created: now_unix,
            mod_counter: 1,
            active_msgs: 0,
            password_crc: 0xFFFF_FFFF,
            base_msg_num: 1,
            reserved: vec![0; RESERVED_SIZE],
        }
    }

    /// The MSGID serial counter stored in the first reserved bytes.
    pub fn msg_serial(&self) -> u32 {
        u32::from_le_bytes([
            self.reserved[0],
            self.reserved[1],
            self.reserved[2],
            self.reserved[3],
        ])
    }

    pub fn set_msg_serial(&mut self, serial: u32) {
        self.reserved[..4].copy_from_slice(&serial.to_le_bytes());
    }
}

/// The JAM message attribute word.
///
/// Bits this implementation does not act on still round-trip unchanged.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageAttributes {
    pub local: bool,
    pub in_transit: bool,
    pub private: bool,
    pub read: bool,
    pub sent: bool,
    pub kill_sent: bool,
    pub archive_sent: bool,
    pub hold: bool,
    pub crash: bool,
    pub immediate: bool,
    pub direct: bool,
    pub gate: bool,
    pub file_request: bool,
    pub file_attach: bool,
    pub trunc_file: bool,
    pub kill_file: bool,
    pub receipt_request: bool,
    pub confirm_request: bool,
    pub orphan: bool,
    pub encrypted: bool,
    pub compressed: bool,
    pub escaped: bool,
    pub force_pickup: bool,
    pub type_local: bool,
    pub type_echo: bool,
    pub type_net: bool,
    #[skip]
    __: B3,
    pub no_display: bool,
    pub locked: bool,
    pub deleted: bool,
}

impl_binrw_bitfield!(MessageAttributes, 4);

impl MessageAttributes {
    /// The raw 32-bit word.
    pub fn bits(&self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    pub fn from_bits(bits: u32) -> Self {
        MessageAttributes::from_bytes(bits.to_le_bytes())
    }

    /// Bitwise OR of two attribute words.
    pub fn merged_with(&self, other: MessageAttributes) -> Self {
        MessageAttributes::from_bits(self.bits() | other.bits())
    }
}

impl Default for MessageAttributes {
    fn default() -> Self {
        MessageAttributes::new()
    }
}

/// Identifies the kind of a message-header subfield.
///
/// The known set is closed, but unknown ids are carried through untouched.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubfieldId(pub u16);

impl SubfieldId {
    pub const ORIG_ADDRESS: SubfieldId = SubfieldId(0);
    pub const DEST_ADDRESS: SubfieldId = SubfieldId(1);
    pub const SENDER_NAME: SubfieldId = SubfieldId(2);
    pub const RECEIVER_NAME: SubfieldId = SubfieldId(3);
    pub const MSG_ID: SubfieldId = SubfieldId(4);
    pub const REPLY_ID: SubfieldId = SubfieldId(5);
    pub const SUBJECT: SubfieldId = SubfieldId(6);
    pub const PID: SubfieldId = SubfieldId(7);
    pub const TRACE: SubfieldId = SubfieldId(8);
    pub const FTS_KLUDGE: SubfieldId = SubfieldId(2000);
    pub const SEEN_BY_2D: SubfieldId = SubfieldId(2001);
    pub const PATH_2D: SubfieldId = SubfieldId(2002);
    pub const FLAGS: SubfieldId = SubfieldId(2003);
    pub const TZUTC: SubfieldId = SubfieldId(2004);
}

/// A typed, length-prefixed fragment stored with a message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub id: SubfieldId,
    /// Reserved on disk; kept for round-trip fidelity.
    pub hi_id: u16,
    pub data: Vec<u8>,
}

impl Subfield {
    pub fn new(id: SubfieldId, data: Vec<u8>) -> Self {
        Subfield { id, hi_id: 0, data }
    }

    pub fn text(id: SubfieldId, text: &str) -> Self {
        Subfield::new(id, text_to_bytes(text))
    }

    /// The payload as text (raw bytes widened, see [`bytes_to_text`]).
    pub fn text_value(&self) -> String {
        bytes_to_text(&self.data)
    }

    /// Bytes this subfield occupies on disk: 8-byte header plus payload.
    pub fn encoded_len(&self) -> u32 {
        8 + self.data.len() as u32
    }
}

impl BinWrite for Subfield {
    type Args<'a> = ();

    fn write_options<W: binrw::io::Write + binrw::io::Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        self.id.0.write_options(writer, endian, ())?;
        self.hi_id.write_options(writer, endian, ())?;
        (self.data.len() as u32).write_options(writer, endian, ())?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

#[binrw::parser(reader, endian)]
fn read_subfields(total: u32) -> BinResult<Vec<Subfield>> {
    let mut remaining = total as u64;
    let mut subfields = Vec::new();
    while remaining >= 8 {
        let pos = reader.stream_position()?;
        let lo_id = u16::read_options(reader, endian, ())?;
        let hi_id = u16::read_options(reader, endian, ())?;
        let dat_len = u32::read_options(reader, endian, ())?;
        if dat_len as u64 > remaining - 8 {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("subfield payload of {dat_len} bytes overruns the region"),
            });
        }
        let mut data = vec![0; dat_len as usize];
        reader.read_exact(&mut data)?;
        remaining -= 8 + dat_len as u64;
        subfields.push(Subfield {
            id: SubfieldId(lo_id),
            hi_id,
            data,
        });
    }
    if remaining > 0 {
        // Trailing bytes too short to hold a subfield header; skip them so
        // the stream lands at the end of the declared region.
        reader.seek(binrw::io::SeekFrom::Current(remaining as i64))?;
    }
    Ok(subfields)
}

#[binrw::writer(writer, endian)]
fn write_subfields(subfields: &Vec<Subfield>) -> BinResult<()> {
    for subfield in subfields {
        subfield.write_options(writer, endian, ())?;
    }
    Ok(())
}

/// A message header in `.jhr`: 76-byte structured prefix plus subfields.
///
/// The subfield-region byte length is derived from `subfields` on write, so
/// an in-place rewrite keeps its size as long as the subfields are left
/// untouched.
#[binrw::binrw]
#[brw(little, magic = b"JAM\0")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub revision: u16,
    pub reserved_word: u16,
    #[br(temp)]
    #[bw(calc = subfields.iter().map(Subfield::encoded_len).sum::<u32>())]
    subfield_len: u32,
    pub times_read: u32,
    /// CRC-32 of this message's MSGID.
    pub msgid_crc: u32,
    /// CRC-32 of this message's REPLYID.
    pub reply_crc: u32,
    /// 1-based message number of the parent, 0 when unlinked.
    pub reply_to: u32,
    /// 1-based message number of the first child.
    pub reply_first: u32,
    /// 1-based message number of the next sibling.
    pub reply_next: u32,
    pub date_written: u32,
    pub date_received: u32,
    /// 0 marks an echomail message that still needs export.
    pub date_processed: u32,
    /// Display number: `base_msg_num + in_file_number - 1`.
    pub message_number: u32,
    pub attributes: MessageAttributes,
    pub attributes2: u32,
    /// Byte offset of the text in `.jdt`.
    pub text_offset: u32,
    pub text_len: u32,
    pub password_crc: u32,
    pub cost: u32,
    #[br(parse_with = read_subfields, args(subfield_len))]
    #[bw(write_with = write_subfields)]
    pub subfields: Vec<Subfield>,
}

impl Default for MessageHeader {
    fn default() -> Self {
        MessageHeader {
            revision: 1,
            reserved_word: 0,
            times_read: 0,
            msgid_crc: 0xFFFF_FFFF,
            reply_crc: 0xFFFF_FFFF,
            reply_to: 0,
            reply_first: 0,
            reply_next: 0,
            date_written: 0,
            date_received: 0,
            date_processed: 0,
            message_number: 0,
            attributes: MessageAttributes::new(),
            attributes2: 0,
            text_offset: 0,
            text_len: 0,
            password_crc: 0xFFFF_FFFF,
            cost: 0,
            subfields: Vec::new(),
        }
    }
}

impl MessageHeader {
    /// First subfield with the given id.
    pub fn subfield(&self, id: SubfieldId) -> Option<&Subfield> {
        self.subfields.iter().find(|s| s.id == id)
    }

    /// First subfield with the given id, as text.
    pub fn subfield_text(&self, id: SubfieldId) -> Option<String> {
        self.subfield(id).map(Subfield::text_value)
    }

    /// Appends a text subfield, skipping empty payloads.
    pub fn push_text(&mut self, id: SubfieldId, text: &str) {
        if !text.is_empty() {
            self.subfields.push(Subfield::text(id, text));
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.attributes.deleted()
    }

    /// Total on-disk size: structured prefix plus subfield region.
    pub fn encoded_len(&self) -> u64 {
        MESSAGE_HEADER_PREFIX_SIZE
            + self
                .subfields
                .iter()
                .map(|s| s.encoded_len() as u64)
                .sum::<u64>()
    }
}

/// One `.jdx` record: recipient-name CRC plus header offset.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct IndexRecord {
    pub to_crc: u32,
    pub hdr_offset: u32,
}

impl IndexRecord {
    /// Marks an index slot with no message behind it.
    pub const HOLE: IndexRecord = IndexRecord {
        to_crc: 0xFFFF_FFFF,
        hdr_offset: 0xFFFF_FFFF,
    };

    pub fn is_hole(&self) -> bool {
        *self == Self::HOLE
    }
}

/// One `.jlr` record tracking a user's read position.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
pub struct LastRead {
    /// CRC-32 of the lowercased user handle.
    pub user_crc: u32,
    /// 0 when unknown.
    pub user_id: u32,
    pub last_read: u32,
    pub high_read: u32,
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ftn_tests::*;

    use super::*;

    test_binrw! {
        IndexRecord => index_record_layout: IndexRecord { to_crc: 0xC0DE_1234, hdr_offset: 0x0000_0400 } => "3412dec000040000"
        IndexRecord => index_record_hole: IndexRecord::HOLE => "ffffffffffffffff"
        LastRead => lastread_layout: LastRead { user_crc: 0x11223344, user_id: 7, last_read: 41, high_read: 42 } => "4433221107000000290000002a000000"
    }

    test_binrw_write! {
        Subfield => subfield_layout: Subfield::text(SubfieldId::MSG_ID, "1:103/705 12345678") => "0400000012000000313a3130332f373035203132333435363738"
    }

    #[test]
    fn fixed_header_is_1024_bytes() {
        let header = FixedHeader::new(1_700_000_000);
        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().len() as u64, FIXED_HEADER_SIZE);

        let read = FixedHeader::read_le(&mut Cursor::new(cursor.get_ref())).unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn fixed_header_serial_counter() {
        let mut header = FixedHeader::new(0);
        assert_eq!(header.msg_serial(), 0);
        header.set_msg_serial(0xA1B2_C3D4);
        assert_eq!(header.msg_serial(), 0xA1B2_C3D4);
        assert_eq!(header.reserved[4..], vec![0u8; RESERVED_SIZE - 4]);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = Vec::new();
        FixedHeader::new(0)
            .write_le(&mut Cursor::new(&mut bytes))
            .unwrap();
        bytes[0] = b'X';
        assert!(FixedHeader::read_le(&mut Cursor::new(&bytes)).is_err());
    }

    #[test]
    fn message_header_round_trip() {
        let mut header = MessageHeader {
            times_read: 3,
            msgid_crc: 0xDEAD_BEEF,
            date_written: 1_700_000_000,
            message_number: 12,
            attributes: MessageAttributes::new().with_local(true).with_type_echo(true),
            text_offset: 4096,
            text_len: 321,
            ..Default::default()
        };
        header.push_text(SubfieldId::SENDER_NAME, "Sysop");
        header.push_text(SubfieldId::RECEIVER_NAME, "All");
        header.push_text(SubfieldId::MSG_ID, "1:103/705 12345678");
        header.push_text(SubfieldId::FTS_KLUDGE, "TID: hub-rs");

        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().len() as u64, header.encoded_len());

        let read = MessageHeader::read_le(&mut Cursor::new(cursor.get_ref())).unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn message_header_prefix_is_76_bytes() {
        let header = MessageHeader::default();
        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().len() as u64, MESSAGE_HEADER_PREFIX_SIZE);
    }

    #[test]
    fn subfield_overrun_is_rejected() {
        let mut bytes = Vec::new();
        let mut header = MessageHeader::default();
        header.push_text(SubfieldId::SUBJECT, "hello");
        header.write_le(&mut Cursor::new(&mut bytes)).unwrap();
        // Corrupt the subfield's declared payload length so it overruns the
        // declared region.
        let dat_len_at = MESSAGE_HEADER_PREFIX_SIZE as usize + 4;
        bytes[dat_len_at..dat_len_at + 4].copy_from_slice(&100u32.to_le_bytes());
        assert!(MessageHeader::read_le(&mut Cursor::new(&bytes)).is_err());
    }

    #[test]
    fn attribute_bits_round_trip_unknown_flags() {
        // 0x1C000000 has no named meaning here but must survive.
        let attrs = MessageAttributes::from_bits(0x9C80_0121);
        assert_eq!(attrs.bits(), 0x9C80_0121);
        assert!(attrs.local());
        assert!(attrs.kill_sent());
        assert!(attrs.crash());
        assert!(attrs.type_local());
        assert!(attrs.deleted());
    }

    #[test]
    fn attribute_merge() {
        let base = MessageAttributes::new().with_private(true);
        let merged = base.merged_with(MessageAttributes::new().with_type_net(true).with_local(true));
        assert!(merged.private() && merged.type_net() && merged.local());
        assert_eq!(merged.bits(), 0x0200_0005);
    }

    #[test]
    fn first_subfield_wins() {
        let mut header = MessageHeader::default();
        header.push_text(SubfieldId::MSG_ID, "first");
        header.push_text(SubfieldId::MSG_ID, "second");
        assert_eq!(header.subfield_text(SubfieldId::MSG_ID).as_deref(), Some("first"));
    }
}
