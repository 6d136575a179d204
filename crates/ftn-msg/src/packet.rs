//! The FTN Type-2+ packet codec.
//!
//! A packet is a 58-byte little-endian header followed by packed messages
//! and a two-byte zero terminator. Each packed message is a 14-byte fixed
//! record followed by five NUL-terminated strings (datetime, to, from,
//! subject, body).
//!
//! Reference: FTS-0001, FSC-0039/FSC-0048 (Type-2+ extensions).

use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use crate::addr::FtnAddress;
use crate::{FtnMsgError, impl_binrw_bitfield};

/// Size of the packet header on the wire.
pub const PACKET_HEADER_SIZE: usize = 58;

/// Packet type of every packet this codec handles.
pub const PACKET_TYPE: u16 = 2;

/// Message type of every packed message record.
const PACKED_MESSAGE_TYPE: u16 = 2;

// Packed-message string field limits, NUL terminator included (FTS-0001).
const DATETIME_FIELD_MAX: usize = 20;
const TO_FIELD_MAX: usize = 36;
const FROM_FIELD_MAX: usize = 36;
const SUBJECT_FIELD_MAX: usize = 72;

/// Type-2+ packet header.
///
/// The zone may appear in two places: the Type-2+ fields (`orig_zone`,
/// `dest_zone`) and the older QMail fields (`q_orig_zone`, `q_dest_zone`).
/// [`PacketHeader::orig_address`] applies the fallback.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct PacketHeader {
    pub orig_node: u16,
    pub dest_node: u16,
    pub year: u16,
    /// 0-based, January = 0.
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub baud: u16,
    /// Must be [`PACKET_TYPE`]; validated by the read entry points.
    pub pkt_type: u16,
    pub orig_net: u16,
    pub dest_net: u16,
    pub product_code: u8,
    pub product_rev_major: u8,
    /// Packet password, NUL-padded.
    pub password: [u8; 8],
    pub q_orig_zone: u16,
    pub q_dest_zone: u16,
    pub aux_net: u16,
    /// Byte-swapped copy of `capability_word`, used for validation.
    pub cap_word_validation: u16,
    pub product_code_hi: u8,
    pub product_rev_minor: u8,
    /// 0x0001 for Type-2+.
    pub capability_word: u16,
    pub orig_zone: u16,
    pub dest_zone: u16,
    pub orig_point: u16,
    pub dest_point: u16,
    pub product_data: u32,
}

impl PacketHeader {
    /// Builds a Type-2+ header between two addresses, stamped with the given
    /// creation time.
    pub fn new(orig: FtnAddress, dest: FtnAddress, at: time::OffsetDateTime) -> Self {
        PacketHeader {
            orig_node: orig.node,
            dest_node: dest.node,
            year: at.year() as u16,
            month: at.month() as u16 - 1,
            day: at.day() as u16,
            hour: at.hour() as u16,
            minute: at.minute() as u16,
            second: at.second() as u16,
            baud: 0,
            pkt_type: PACKET_TYPE,
            orig_net: orig.net,
            dest_net: dest.net,
            product_code: 0xFE,
            product_rev_major: 1,
            password: [0; 8],
            q_orig_zone: orig.zone,
            q_dest_zone: dest.zone,
            aux_net: 0,
            cap_word_validation: 0x0001u16.swap_bytes(),
            product_code_hi: 0,
            product_rev_minor: 0,
            capability_word: 0x0001,
            orig_zone: orig.zone,
            dest_zone: dest.zone,
            orig_point: orig.point,
            dest_point: dest.point,
            product_data: 0,
        }
    }

    /// Origin address with the zone fallback: Type-2+ zone first, then the
    /// QMail zone field.
    pub fn orig_address(&self) -> FtnAddress {
        FtnAddress {
            zone: if self.orig_zone != 0 {
                self.orig_zone
            } else {
                self.q_orig_zone
            },
            net: self.orig_net,
            node: self.orig_node,
            point: self.orig_point,
        }
    }

    /// Destination address with the same zone fallback as
    /// [`PacketHeader::orig_address`].
    pub fn dest_address(&self) -> FtnAddress {
        FtnAddress {
            zone: if self.dest_zone != 0 {
                self.dest_zone
            } else {
                self.q_dest_zone
            },
            net: self.dest_net,
            node: self.dest_node,
            point: self.dest_point,
        }
    }

    /// The packed password as text, trailing NULs stripped.
    pub fn password_str(&self) -> String {
        let end = self
            .password
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.password.len());
        bytes_to_text(&self.password[..end])
    }

    /// Sets the packed password, truncating to eight bytes.
    pub fn set_password(&mut self, password: &str) {
        let bytes = text_to_bytes(password);
        self.password = [0; 8];
        let len = bytes.len().min(8);
        self.password[..len].copy_from_slice(&bytes[..len]);
    }

    /// Whether the capability-word validation copy matches. Type-2 packets
    /// from older mailers leave both words zero, which also passes.
    pub fn capability_valid(&self) -> bool {
        self.cap_word_validation == self.capability_word.swap_bytes()
    }
}

/// FTS-0001 message attribute word carried by packed messages.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedAttributes {
    pub private: bool,
    pub crash: bool,
    pub received: bool,
    pub sent: bool,
    pub file_attached: bool,
    pub in_transit: bool,
    pub orphan: bool,
    pub kill_sent: bool,
    pub local: bool,
    pub hold: bool,
    #[skip]
    __: B1,
    pub file_request: bool,
    pub return_receipt_request: bool,
    pub is_return_receipt: bool,
    pub audit_request: bool,
    pub file_update_request: bool,
}

impl_binrw_bitfield!(PackedAttributes, 2);

/// One message inside a packet.
///
/// String fields hold the raw CP437 bytes widened 1:1 into `char`s; see
/// [`bytes_to_text`]. `date_time` is the literal 19-character field, not a
/// parsed timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedMessage {
    pub orig_node: u16,
    pub dest_node: u16,
    pub orig_net: u16,
    pub dest_net: u16,
    pub attributes: PackedAttributes,
    pub cost: u16,
    pub date_time: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl Default for PackedAttributes {
    fn default() -> Self {
        PackedAttributes::new()
    }
}

/// Widens raw CP437 bytes into a `String`, one `char` per byte. Reversible
/// through [`text_to_bytes`]; no transcoding is performed.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Narrows a string produced by [`bytes_to_text`] (or plain ASCII) back to
/// bytes. Code points above U+00FF have no CP437 byte and become `?`.
pub fn text_to_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect()
}

/// Reads only the packet header from the start of a file.
pub fn read_header_from_file(path: &Path) -> crate::Result<PacketHeader> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; PACKET_HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FtnMsgError::TruncatedPacket
        } else {
            FtnMsgError::Io(e)
        }
    })?;
    parse_header(&buf)
}

fn parse_header(buf: &[u8]) -> crate::Result<PacketHeader> {
    if buf.len() < PACKET_HEADER_SIZE {
        return Err(FtnMsgError::TruncatedPacket);
    }
    let header = PacketHeader::read_le(&mut Cursor::new(buf))?;
    if header.pkt_type != PACKET_TYPE {
        return Err(FtnMsgError::InvalidPacketType(header.pkt_type));
    }
    Ok(header)
}

/// Reads a whole packet: header plus messages, up to the zero terminator or
/// end of input.
pub fn read_packet<R: Read>(mut reader: R) -> crate::Result<(PacketHeader, Vec<PackedMessage>)> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;

    let header = parse_header(&buf)?;
    let mut cursor = Cursor::new(buf.as_slice());
    cursor.set_position(PACKET_HEADER_SIZE as u64);

    let mut messages = Vec::new();
    while let Some(message) = read_packed_message(&mut cursor)? {
        messages.push(message);
    }
    Ok((header, messages))
}

/// Writes a packet: header, each message, then the zero terminator.
pub fn write_packet<W: Write + Seek>(
    writer: &mut W,
    header: &PacketHeader,
    messages: &[PackedMessage],
) -> crate::Result<()> {
    header.write_le(writer)?;
    for message in messages {
        write_packed_message(writer, message)?;
    }
    writer.write_all(&0u16.to_le_bytes())?;
    Ok(())
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Option<u16> {
    let buf = *cursor.get_ref();
    let pos = cursor.position() as usize;
    if pos + 2 > buf.len() {
        return None;
    }
    cursor.set_position((pos + 2) as u64);
    Some(u16::from_le_bytes([buf[pos], buf[pos + 1]]))
}

/// Reads a NUL-terminated string field. `max` is the on-wire field limit
/// including the terminator; `None` means unbounded (the body), where end of
/// input also terminates.
fn read_cstring(cursor: &mut Cursor<&[u8]>, max: Option<usize>) -> crate::Result<String> {
    let buf = *cursor.get_ref();
    let start = cursor.position() as usize;
    let window_end = match max {
        Some(max) => (start + max).min(buf.len()),
        None => buf.len(),
    };

    match buf[start..window_end].iter().position(|&b| b == 0) {
        Some(idx) => {
            cursor.set_position((start + idx + 1) as u64);
            Ok(bytes_to_text(&buf[start..start + idx]))
        }
        None if max.is_none() => {
            cursor.set_position(buf.len() as u64);
            Ok(bytes_to_text(&buf[start..]))
        }
        None => Err(FtnMsgError::TruncatedMessage),
    }
}

fn read_packed_message(cursor: &mut Cursor<&[u8]>) -> crate::Result<Option<PackedMessage>> {
    // The leading type word doubles as the packet terminator; missing
    // trailing zeroes are tolerated at end of input.
    let msg_type = match read_u16(cursor) {
        Some(v) => v,
        None => return Ok(None),
    };
    if msg_type == 0 {
        return Ok(None);
    }
    if msg_type != PACKED_MESSAGE_TYPE {
        return Err(FtnMsgError::InvalidMessageType(msg_type));
    }

    let mut next = || read_u16(cursor).ok_or(FtnMsgError::TruncatedMessage);
    let orig_node = next()?;
    let dest_node = next()?;
    let orig_net = next()?;
    let dest_net = next()?;
    let attributes = PackedAttributes::from_bytes(next()?.to_le_bytes());
    let cost = next()?;

    Ok(Some(PackedMessage {
        orig_node,
        dest_node,
        orig_net,
        dest_net,
        attributes,
        cost,
        date_time: read_cstring(cursor, Some(DATETIME_FIELD_MAX))?,
        to: read_cstring(cursor, Some(TO_FIELD_MAX))?,
        from: read_cstring(cursor, Some(FROM_FIELD_MAX))?,
        subject: read_cstring(cursor, Some(SUBJECT_FIELD_MAX))?,
        body: read_cstring(cursor, None)?,
    }))
}

/// Writes a string field truncated to `max` bytes including the NUL.
fn write_cstring<W: Write>(writer: &mut W, text: &str, max: Option<usize>) -> crate::Result<()> {
    let mut bytes = text_to_bytes(text);
    if let Some(max) = max {
        bytes.truncate(max - 1);
    }
    writer.write_all(&bytes)?;
    writer.write_all(&[0])?;
    Ok(())
}

fn write_packed_message<W: Write + Seek>(
    writer: &mut W,
    message: &PackedMessage,
) -> crate::Result<()> {
    PACKED_MESSAGE_TYPE.write_le(writer)?;
    message.orig_node.write_le(writer)?;
    message.dest_node.write_le(writer)?;
    message.orig_net.write_le(writer)?;
    message.dest_net.write_le(writer)?;
    message.attributes.write_le(writer)?;
    message.cost.write_le(writer)?;

    // The datetime field is fixed-width: exactly 19 characters plus NUL.
    let mut stamp = text_to_bytes(&message.date_time);
    stamp.resize(DATETIME_FIELD_MAX - 1, b' ');
    writer.write_all(&stamp)?;
    writer.write_all(&[0])?;

    write_cstring(writer, &message.to, Some(TO_FIELD_MAX))?;
    write_cstring(writer, &message.from, Some(FROM_FIELD_MAX))?;
    write_cstring(writer, &message.subject, Some(SUBJECT_FIELD_MAX))?;
    write_cstring(writer, &message.body, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ftn_tests::*;

    use super::*;

    fn sample_header() -> PacketHeader {
        PacketHeader {
            orig_node: 705,
            dest_node: 56,
            year: 2026,
            month: 0,
            day: 15,
            hour: 12,
            minute: 34,
            second: 56,
            baud: 0,
            pkt_type: 2,
            orig_net: 103,
            dest_net: 104,
            product_code: 0xFE,
            product_rev_major: 1,
            password: *b"secret\0\0",
            q_orig_zone: 1,
            q_dest_zone: 1,
            aux_net: 0,
            cap_word_validation: 0x0100,
            product_code_hi: 0,
            product_rev_minor: 0,
            capability_word: 0x0001,
            orig_zone: 1,
            dest_zone: 1,
            orig_point: 0,
            dest_point: 0,
            product_data: 0,
        }
    }

    test_binrw! {
        PacketHeader => header_layout: sample_header() =>
            "c1023800ea0700000f000c00220038000000020067006800fe017365637265740000010001000000000100000100010001000000000000000000"
    }

    #[test]
    fn header_is_58_bytes() {
        let mut cursor = Cursor::new(Vec::new());
        sample_header().write_le(&mut cursor).unwrap();
        assert_eq!(cursor.get_ref().len(), PACKET_HEADER_SIZE);
    }

    #[test]
    fn address_zone_fallback() {
        let mut header = sample_header();
        header.orig_zone = 0;
        header.q_orig_zone = 2;
        assert_eq!(header.orig_address(), FtnAddress::new(2, 103, 705));
        assert_eq!(header.dest_address(), FtnAddress::new(1, 104, 56));
    }

    #[test]
    fn password_round_trip() {
        let mut header = sample_header();
        assert_eq!(header.password_str(), "secret");
        header.set_password("much-too-long");
        assert_eq!(header.password_str(), "much-too");
    }

    #[test]
    fn packet_round_trip() {
        let header = sample_header();
        let message = PackedMessage {
            orig_node: 705,
            dest_node: 56,
            orig_net: 103,
            dest_net: 104,
            attributes: PackedAttributes::new().with_local(true),
            cost: 0,
            date_time: "15 Jan 26  12:34:56".into(),
            to: "All".into(),
            from: "Sysop".into(),
            subject: "Test Subject".into(),
            body: "AREA:GENERAL\rHello World!\r".into(),
        };

        let mut cursor = Cursor::new(Vec::new());
        write_packet(&mut cursor, &header, std::slice::from_ref(&message)).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);

        let (parsed_header, messages) = read_packet(bytes.as_slice()).unwrap();
        assert_eq!(parsed_header, header);
        assert_eq!(messages, vec![message]);

        // Writing the parse result again reproduces the bytes exactly.
        let mut cursor = Cursor::new(Vec::new());
        write_packet(&mut cursor, &parsed_header, &messages).unwrap();
        assert_eq!(cursor.into_inner(), bytes);
    }

    #[test]
    fn three_byte_packet_is_truncated() {
        assert!(matches!(
            read_packet(&[0x02u8, 0x00, 0x00][..]),
            Err(FtnMsgError::TruncatedPacket)
        ));
    }

    #[test]
    fn rejects_wrong_packet_type() {
        let mut header = sample_header();
        header.pkt_type = 3;
        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        cursor.get_mut().extend_from_slice(&[0, 0]);
        assert!(matches!(
            read_packet(cursor.get_ref().as_slice()),
            Err(FtnMsgError::InvalidPacketType(3))
        ));
    }

    #[test]
    fn overlong_to_field_without_nul_is_truncated_message() {
        let header = sample_header();
        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        // Fixed record, then a datetime field and a To field with no NUL in range.
        let mut bytes = cursor.into_inner();
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 12]);
        bytes.extend_from_slice(b"15 Jan 26  12:34:56\0");
        bytes.extend_from_slice(&[b'x'; TO_FIELD_MAX]);
        assert!(matches!(
            read_packet(bytes.as_slice()),
            Err(FtnMsgError::TruncatedMessage)
        ));
    }

    #[test]
    fn write_truncates_overlong_fields() {
        let header = sample_header();
        let message = PackedMessage {
            to: "x".repeat(50),
            from: "y".repeat(50),
            subject: "z".repeat(100),
            date_time: "15 Jan 26  12:34:56".into(),
            ..Default::default()
        };
        let mut cursor = Cursor::new(Vec::new());
        write_packet(&mut cursor, &header, &[message]).unwrap();
        let (_, messages) = read_packet(cursor.get_ref().as_slice()).unwrap();
        assert_eq!(messages[0].to, "x".repeat(TO_FIELD_MAX - 1));
        assert_eq!(messages[0].from, "y".repeat(FROM_FIELD_MAX - 1));
        assert_eq!(messages[0].subject, "z".repeat(SUBJECT_FIELD_MAX - 1));
    }

    #[test]
    fn short_datetime_is_padded_to_width() {
        let header = sample_header();
        let message = PackedMessage {
            date_time: "1 Jan 26".into(),
            ..Default::default()
        };
        let mut cursor = Cursor::new(Vec::new());
        write_packet(&mut cursor, &header, &[message]).unwrap();
        let (_, messages) = read_packet(cursor.get_ref().as_slice()).unwrap();
        assert_eq!(messages[0].date_time.len(), 19);
        assert!(messages[0].date_time.starts_with("1 Jan 26"));
    }

    #[test]
    fn text_widening_round_trip() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(text_to_bytes(&bytes_to_text(&bytes)), bytes);
        assert_eq!(text_to_bytes("caf\u{2764}"), b"caf?");
    }
}
