//! Error types for the JAM storage layer.

/// Errors surfaced by message-base operations.
#[derive(Debug, thiserror::Error)]
pub enum JamError {
    #[error("not a JAM header, bad signature")]
    InvalidSignature,

    #[error("message number {0} is out of range")]
    InvalidMessage(u32),

    #[error("message base is not open")]
    BaseNotOpen,

    #[error("not found")]
    NotFound,

    #[error("timed out waiting for the base lock")]
    LockTimeout,

    #[error("binary layout error: {0}")]
    Layout(#[from] binrw::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
