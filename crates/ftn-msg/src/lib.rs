//! FTN message primitives: addresses, the JAM CRC-32 variant, the FTN
//! datetime format, the Type-2+ packet codec and echomail body parsing.
//!
//! Everything in this crate is pure: it operates on readers, writers and
//! byte buffers, and knows nothing about message bases or routing.

#![forbid(unsafe_code)]

pub mod addr;
pub mod body;
pub mod crc;
pub mod datetime;
pub mod error;
pub mod packet;

mod bitfield_io;

pub use addr::FtnAddress;
pub use body::ParsedBody;
pub use crc::crc32_jam;
pub use datetime::{format_ftn_datetime, parse_ftn_datetime};
pub use error::FtnMsgError;
pub use packet::{
    PACKET_HEADER_SIZE, PacketHeader, PackedAttributes, PackedMessage, read_header_from_file,
    read_packet, write_packet,
};

/// FTN codec result type
pub type Result<T> = std::result::Result<T, FtnMsgError>;
