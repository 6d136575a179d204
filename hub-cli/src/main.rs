use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use ftn_toss::{AreaManager, FtnConfig, TossStats, Tosser};

mod cli;
mod maint;
mod post;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(errors) if errors == 0 => ExitCode::SUCCESS,
        Ok(errors) => {
            log::error!("finished with {errors} errors");
            ExitCode::from(errors.min(255) as u8)
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<u32, Box<dyn Error>> {
    let areas = Arc::new(AreaManager::load(&cli.areas, &cli.data_root)?);

    match &cli.command {
        Commands::Areas => {
            for area in areas.list_areas() {
                println!(
                    "{:>4}  {:<16} {:<12} {:<10} {}",
                    area.id,
                    area.tag,
                    area.echo_tag,
                    area.network,
                    area.name
                );
            }
            return Ok(0);
        }
        Commands::Maint(cmd) => return maint::maint(cmd, &areas),
        Commands::Post(cmd) => return post::post(cmd, cli, &areas),
        _ => {}
    }

    let tossers = make_tossers(cli, &areas)?;

    match &cli.command {
        Commands::Toss => {
            let mut stats = TossStats::default();
            for tosser in &tossers {
                stats.merge(tosser.process_inbound());
            }
            print_stats(&stats);
            Ok(stats.errors)
        }
        Commands::Scan => {
            let mut stats = TossStats::default();
            for tosser in &tossers {
                stats.merge(tosser.scan_and_export());
                stats.merge(tosser.pack_outbound());
            }
            print_stats(&stats);
            Ok(stats.errors)
        }
        Commands::Poll => {
            let cancel = Arc::new(AtomicBool::new(false));
            ctrlc::set_handler({
                let cancel = cancel.clone();
                move || {
                    log::info!("shutdown requested, finishing the current cycle...");
                    cancel.store(true, Ordering::Relaxed);
                }
            })?;

            std::thread::scope(|scope| {
                for tosser in &tossers {
                    let cancel = cancel.clone();
                    scope.spawn(move || tosser.poll_loop(&cancel));
                }
            });
            Ok(0)
        }
        Commands::Areas | Commands::Maint(_) | Commands::Post(_) => unreachable!(),
    }
}

fn make_tossers(cli: &Cli, areas: &Arc<AreaManager>) -> Result<Vec<Tosser>, Box<dyn Error>> {
    let config = FtnConfig::load(&cli.config)?;
    let mut tossers = Vec::new();
    for (name, network) in config.networks {
        if let Some(only) = &cli.network {
            if only != &name {
                continue;
            }
        }
        tossers.push(Tosser::new(name, network, areas.clone())?);
    }
    if tossers.is_empty() {
        return Err("no matching networks configured".into());
    }
    Ok(tossers)
}

fn print_stats(stats: &TossStats) {
    println!(
        "imported {} (dupes {}, bad {}, netmail {}), exported {}, bundles {}, errors {}",
        stats.imported,
        stats.dupes,
        stats.bad,
        stats.netmail,
        stats.exported,
        stats.bundles,
        stats.errors
    );
}
