use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use ftn_toss::AreaManager;

#[derive(Parser)]
pub struct MaintCmd {
    #[command(subcommand)]
    pub action: MaintAction,
}

#[derive(Subcommand)]
pub enum MaintAction {
    /// Compacts a base: drops deleted messages, renumbers the rest, then
    /// rebuilds reply threading.
    Pack {
        /// Area tag.
        area: String,
    },
    /// Rebuilds reply threading without compacting.
    Link { area: String },
    /// Prints base counters.
    Stats { area: String },
    /// Applies retention limits (max messages / max age) to one area, or
    /// to every area when none is given.
    Purge { area: Option<String> },
}

pub fn maint(cmd: &MaintCmd, areas: &Arc<AreaManager>) -> Result<u32, Box<dyn Error>> {
    let tag = match &cmd.action {
        MaintAction::Pack { area } | MaintAction::Link { area } | MaintAction::Stats { area } => {
            area
        }
        MaintAction::Purge { area } => {
            let mut errors = 0;
            for target in areas.list_areas() {
                if let Some(only) = area {
                    if !target.tag.eq_ignore_ascii_case(only) {
                        continue;
                    }
                }
                match ftn_toss::purge_area(areas, target) {
                    Ok(stats) if stats.deleted > 0 => println!(
                        "{}: purged {} messages{}",
                        target.tag,
                        stats.deleted,
                        if stats.packed { ", base packed" } else { "" }
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("purge of {} failed: {e}", target.tag);
                        errors += 1;
                    }
                }
            }
            return Ok(errors);
        }
    };
    let area = areas
        .area_by_tag(tag)
        .ok_or_else(|| format!("no area tagged {tag:?}"))?;
    let base = areas.open_base(area.id)?;

    match &cmd.action {
        MaintAction::Pack { .. } => {
            let stats = base.pack()?;
            let relinked = base.link()?;
            println!(
                "{}: {} -> {} messages ({} removed), {} headers relinked",
                area.tag, stats.before, stats.after, stats.removed, relinked
            );
        }
        MaintAction::Link { .. } => {
            let relinked = base.link()?;
            println!("{}: {} headers relinked", area.tag, relinked);
        }
        MaintAction::Stats { .. } => {
            let stats = base.stats()?;
            println!(
                "{}: {} messages ({} active), base number {}, mod counter {}, hwm {}",
                area.tag,
                stats.messages,
                stats.active,
                stats.base_msg_num,
                stats.mod_counter,
                base.hwm()?
            );
        }
        MaintAction::Purge { .. } => unreachable!("Purge is handled and returns earlier"),
    }
    Ok(0)
}
