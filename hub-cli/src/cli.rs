use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::maint::MaintCmd;
use crate::post::PostCmd;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the network configuration.
    #[arg(long, default_value = "ftn.json")]
    pub config: PathBuf,

    /// Path to the message-area definitions.
    #[arg(long, default_value = "message_areas.json")]
    pub areas: PathBuf,

    /// Data root that area base paths resolve against.
    #[arg(long, default_value = ".")]
    pub data_root: PathBuf,

    /// Restrict the command to a single network.
    #[arg(short, long)]
    pub network: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs one inbound pass: unpack bundles, toss packets into areas.
    Toss,
    /// Scans areas for pending echomail, writes packets, bundles them.
    Scan,
    /// Runs full tosser cycles on the configured interval until Ctrl-C.
    Poll,
    /// Posts a message into an area.
    Post(PostCmd),
    /// Message-base maintenance.
    Maint(MaintCmd),
    /// Lists the configured message areas.
    Areas,
}
