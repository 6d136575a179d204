//! The JAM message base: a four-file on-disk store with per-message
//! headers, text, an index, a lastread table and a cross-process lock.
//!
//! File layout for a base at prefix `<base>`:
//!
//! | File | Contents |
//! |------|----------|
//! | `<base>.jhr` | 1024-byte fixed header, then variable-length message headers |
//! | `<base>.jdt` | concatenated raw message text |
//! | `<base>.jdx` | 8-byte index records, one per message |
//! | `<base>.jlr` | 16-byte lastread records, one per user |
//! | `<base>.bsy` | advisory lock, present while a writer holds the base |
//!
//! All multi-byte fields are little-endian. The formats are shared with
//! every other JAM implementation and must stay bit-exact.

#![forbid(unsafe_code)]

pub mod base;
pub mod error;
pub mod lock;
pub mod message;
pub mod pack;
pub mod records;

pub use base::{BaseStats, MessageBase, PRODUCT_ID};
pub use error::JamError;
pub use message::{Message, MessageKind};
pub use pack::PackStats;
pub use records::{
    FIXED_HEADER_SIZE, FixedHeader, IndexRecord, LastRead, MessageAttributes, MessageHeader,
    Subfield, SubfieldId,
};

/// JAM storage result type
pub type Result<T> = std::result::Result<T, JamError>;

/// Synthetic lastread user that stores the outbound scanner's high-water
/// mark, colocated with the base so it survives pack and follows the files.
pub const HWM_USER: &str = "v3mail";
