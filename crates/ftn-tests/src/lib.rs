//! Test helpers shared across the workspace.
//!
//! The [`test_binrw!`] macro family asserts bit-exact serialization of a
//! value against a hex literal, in both directions where possible.

#![forbid(unsafe_code)]

/// Decodes a hex string (no separators) into bytes. Panics on odd length or
/// non-hex characters; this is test-only code.
pub fn decode_hex(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0, "hex literal has odd length: {s:?}");
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("invalid hex literal"))
        .collect()
}

/// Encodes bytes as a lowercase hex string.
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Generates a test asserting that a value serializes (little-endian) to the
/// given hex string, and that the same bytes deserialize back to the value.
///
/// ```ignore
/// test_binrw! {
///     IndexRecord => hole: IndexRecord { to_crc: 0xffffffff, hdr_offset: 0xffffffff } => "ffffffffffffffff"
/// }
/// ```
#[macro_export]
macro_rules! test_binrw {
    ($($ty:ty => $name:ident: $value:expr => $hex:literal)+) => {
        $(
            #[test]
            fn $name() {
                let value: $ty = $value;
                let mut cursor = ::std::io::Cursor::new(Vec::new());
                ::binrw::BinWrite::write_le(&value, &mut cursor).expect("serialization failed");
                assert_eq!(
                    $crate::encode_hex(cursor.get_ref()),
                    $hex,
                    "serialized bytes mismatch"
                );

                let bytes = $crate::decode_hex($hex);
                let mut cursor = ::std::io::Cursor::new(&bytes);
                let read: $ty =
                    ::binrw::BinRead::read_le(&mut cursor).expect("deserialization failed");
                assert_eq!(read, value, "deserialized value mismatch");
                assert_eq!(
                    cursor.position() as usize,
                    bytes.len(),
                    "deserialization left trailing bytes"
                );
            }
        )+
    };
}

/// One-directional variant of [`test_binrw!`]: bytes must parse to the value.
#[macro_export]
macro_rules! test_binrw_read {
    ($($ty:ty => $name:ident: $hex:literal => $value:expr)+) => {
        $(
            #[test]
            fn $name() {
                let bytes = $crate::decode_hex($hex);
                let read: $ty = ::binrw::BinRead::read_le(&mut ::std::io::Cursor::new(&bytes))
                    .expect("deserialization failed");
                assert_eq!(read, $value);
            }
        )+
    };
}

/// One-directional variant of [`test_binrw!`]: the value must serialize to
/// the bytes. Useful where reading normalizes or rejects the input.
#[macro_export]
macro_rules! test_binrw_write {
    ($($ty:ty => $name:ident: $value:expr => $hex:literal)+) => {
        $(
            #[test]
            fn $name() {
                let value: $ty = $value;
                let mut cursor = ::std::io::Cursor::new(Vec::new());
                ::binrw::BinWrite::write_le(&value, &mut cursor).expect("serialization failed");
                assert_eq!($crate::encode_hex(cursor.get_ref()), $hex);
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let bytes = decode_hex("00ff10a5");
        assert_eq!(bytes, [0x00, 0xff, 0x10, 0xa5]);
        assert_eq!(encode_hex(&bytes), "00ff10a5");
    }
}
