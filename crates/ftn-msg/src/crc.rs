//! The JAM CRC-32: IEEE CRC-32 over the ASCII-lowercased input, inverted.
//!
//! This value keys the message index (recipient name), the lastread table
//! (user handle) and reply threading (MSGID/REPLYID), so it must match what
//! every other JAM implementation computes byte for byte.

use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 per the JAM specification.
///
/// Only ASCII `A..Z` is lowercased; the mapping is never locale-aware, so
/// multi-byte characters pass through untouched.
pub fn crc32_jam(input: &str) -> u32 {
    crc32_jam_bytes(input.as_bytes())
}

/// Byte-level variant of [`crc32_jam`] for payloads that are not UTF-8.
pub fn crc32_jam_bytes(input: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    for b in input {
        digest.update(&[b.to_ascii_lowercase()]);
    }
    !digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_inverted_initial_state() {
        assert_eq!(crc32_jam(""), 0xFFFF_FFFF);
    }

    #[test]
    fn case_insensitive_over_ascii() {
        assert_eq!(crc32_jam("SysOp"), crc32_jam("sysop"));
        assert_eq!(crc32_jam("ALL"), crc32_jam("all"));
    }

    #[test]
    fn case_sensitive_outside_ascii() {
        // ASCII-only lowercasing must not touch multi-byte characters.
        assert_ne!(crc32_jam("Ångström"), crc32_jam("ångström"));
    }

    #[test]
    fn known_value() {
        // !crc32("hello world") with the IEEE polynomial.
        assert_eq!(crc32_jam("Hello World"), !0x0D4A_1185);
    }
}
