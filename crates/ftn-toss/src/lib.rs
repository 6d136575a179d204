//! The tossing layer: per-network inbound and outbound echomail/netmail
//! pipelines over JAM bases.
//!
//! Inbound: ZIP bundles are unpacked, Type-2+ packets parsed, messages
//! deduplicated, routed to their area and appended. Outbound: echomail
//! areas are scanned from a persistent high-water mark, pending messages
//! packed per link, packets bundled into ZIPs and announced through BSO
//! flow files. The transport daemon that moves the bundles is somebody
//! else's job.

#![forbid(unsafe_code)]

pub mod areas;
pub mod bundle;
pub mod config;
pub mod dupes;
pub mod error;
pub mod inbound;
pub mod maint;
pub mod outbound;
pub mod tosser;

pub use areas::{AreaManager, AreaType, MessageArea};
pub use config::{FtnConfig, LinkConfig, LinkFlavour, NetworkConfig};
pub use dupes::DupeDb;
pub use error::TossError;
pub use maint::{PurgeStats, purge_area};
pub use tosser::{TossStats, Tosser};

/// Tossing result type
pub type Result<T> = std::result::Result<T, TossError>;

pub(crate) fn unix_now() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}
