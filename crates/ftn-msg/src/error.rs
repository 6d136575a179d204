//! Error types for the FTN codec layer.

/// Errors surfaced by address parsing and the packet codec.
#[derive(Debug, thiserror::Error)]
pub enum FtnMsgError {
    #[error("malformed FTN address: {0:?}")]
    BadAddress(String),

    #[error("unsupported packet type {0}, only type 2 is handled")]
    InvalidPacketType(u16),

    #[error("unsupported packed message type {0}")]
    InvalidMessageType(u16),

    #[error("packet ends before the header is complete")]
    TruncatedPacket,

    #[error("packed message field exceeds its limit without a terminator")]
    TruncatedMessage,

    #[error("unparsable FTN datetime: {0:?}")]
    InvalidDateTime(String),

    #[error("binary layout error: {0}")]
    Layout(#[from] binrw::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
