use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use time::OffsetDateTime;

use ftn_jam::{Message, MessageKind};
use ftn_toss::{AreaManager, AreaType, FtnConfig};

use crate::cli::Cli;

#[derive(Parser)]
pub struct PostCmd {
    /// Area tag to post into.
    #[arg(short, long)]
    pub area: String,

    #[arg(short, long, default_value = "Sysop")]
    pub from: String,

    #[arg(short, long, default_value = "All")]
    pub to: String,

    #[arg(short, long)]
    pub subject: String,

    /// Message text; lines may be separated with `\n`.
    pub text: String,
}

pub fn post(cmd: &PostCmd, cli: &Cli, areas: &Arc<AreaManager>) -> Result<u32, Box<dyn Error>> {
    let area = areas
        .area_by_tag(&cmd.area)
        .ok_or_else(|| format!("no area tagged {:?}", cmd.area))?;
    let base = areas.open_base(area.id)?;

    let kind = match area.area_type {
        AreaType::Local => MessageKind::Local,
        AreaType::Echomail => MessageKind::Echomail,
        AreaType::Netmail => MessageKind::Netmail,
    };

    // Echomail needs an origin address and BBS name from the area's
    // network; purely local posts do not.
    let (orig_addr, bbs_name) = if area.network.is_empty() {
        (None, String::new())
    } else {
        let config = FtnConfig::load(&cli.config)?;
        let network = config
            .networks
            .get(&area.network)
            .ok_or_else(|| format!("area {} references unknown network {:?}", area.tag, area.network))?;
        (Some(network.own_address()?), network.bbs_name.clone())
    };

    let msg = Message {
        from: cmd.from.clone(),
        to: cmd.to.clone(),
        subject: cmd.subject.clone(),
        written: OffsetDateTime::now_utc(),
        text: cmd.text.replace('\n', "\r"),
        orig_addr,
        ..Default::default()
    };

    let msg_num = base.write_message_ext(&msg, kind, &area.echo_tag, &bbs_name, "")?;
    println!("posted message {} to {}", msg_num, area.tag);
    Ok(0)
}
