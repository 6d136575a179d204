//! The `ftn.json` network configuration consumed by the tosser.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ftn_msg::FtnAddress;

use crate::TossError;

/// Top-level `ftn.json` document: one entry per network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtnConfig {
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl FtnConfig {
    pub fn load(path: &Path) -> crate::Result<FtnConfig> {
        let file = File::open(path).map_err(|e| {
            TossError::Config(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// One FTN network: our address in it, its directories and its links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Our own address in this network, e.g. `"1:103/705"`.
    pub own_address: String,
    /// Directory remote bundles and packets arrive in.
    pub inbound: PathBuf,
    /// Optional second inbound for password-protected sessions.
    #[serde(default)]
    pub secure_inbound: Option<PathBuf>,
    /// Staging directory for outbound packets awaiting bundling.
    pub outbound: PathBuf,
    /// The binkd outbound: bundles and flow files are emitted here.
    pub binkd_outbound: PathBuf,
    /// Scratch space: bundle extraction, quarantined packets.
    pub temp: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    pub dupe_db_path: PathBuf,
    /// Maximum dupe-entry age in days before purge.
    #[serde(default = "default_dupe_max_age_days")]
    pub dupe_max_age_days: u64,
    /// Tag of the area receiving netmail, when one is configured.
    #[serde(default)]
    pub netmail_area: Option<String>,
    /// Tag of the area receiving messages with unknown echo tags.
    #[serde(default)]
    pub bad_area: Option<String>,
    /// Tag of the area receiving duplicates.
    #[serde(default)]
    pub dupe_area: Option<String>,
    /// BBS name used in origin lines for locally posted echomail.
    #[serde(default)]
    pub bbs_name: String,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_dupe_max_age_days() -> u64 {
    30
}

impl NetworkConfig {
    pub fn own_address(&self) -> crate::Result<FtnAddress> {
        self.own_address
            .parse()
            .map_err(|_| TossError::Config(format!("bad own_address {:?}", self.own_address)))
    }
}

/// A remote system we exchange mail with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub address: String,
    #[serde(default)]
    pub name: String,
    /// Session password, used by the transport daemon, not by us.
    #[serde(default)]
    pub password: String,
    /// Password placed in outbound packet headers.
    #[serde(default)]
    pub pkt_password: String,
    /// Echo tags this link subscribes to; `"*"` subscribes to everything.
    #[serde(default)]
    pub echos: Vec<String>,
    #[serde(default)]
    pub flavour: LinkFlavour,
}

impl LinkConfig {
    pub fn address(&self) -> crate::Result<FtnAddress> {
        self.address
            .parse()
            .map_err(|_| TossError::Config(format!("bad link address {:?}", self.address)))
    }

    /// Whether this link subscribes to the given echo tag.
    pub fn carries_echo(&self, echo_tag: &str) -> bool {
        self.echos
            .iter()
            .any(|e| e == "*" || e.eq_ignore_ascii_case(echo_tag))
    }
}

/// BSO delivery disposition for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkFlavour {
    #[default]
    Normal,
    Crash,
    Hold,
    Direct,
}

impl LinkFlavour {
    /// The BSO flow-file extension, `None` for Normal (no flow file).
    pub fn flow_extension(&self) -> Option<&'static str> {
        match self {
            LinkFlavour::Normal => None,
            LinkFlavour::Crash => Some("clo"),
            LinkFlavour::Hold => Some("hlo"),
            LinkFlavour::Direct => Some("dlo"),
        }
    }
}
