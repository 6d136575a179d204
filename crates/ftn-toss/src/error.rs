//! Error types for the tossing layer.

use std::path::PathBuf;

/// Errors surfaced by the tosser and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TossError {
    #[error("{0} is not a ZIP bundle")]
    BundleNotZip(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no area for tag {0:?}")]
    AreaNotFound(String),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Jam(#[from] ftn_jam::JamError),

    #[error(transparent)]
    Msg(#[from] ftn_msg::FtnMsgError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
