//! The per-network tosser: owns the configuration, the area registry and
//! the dupe database, and drives the import/export/bundle cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ftn_msg::FtnAddress;

use crate::areas::AreaManager;
use crate::config::NetworkConfig;
use crate::dupes::DupeDb;

/// Counters for one tosser pass (or an aggregation of passes).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TossStats {
    /// Echomail messages written to their area (bad-area routing included).
    pub imported: u32,
    /// Messages refused or diverted as duplicates.
    pub dupes: u32,
    /// Messages routed to the bad area for an unknown tag.
    pub bad: u32,
    /// Netmail messages delivered.
    pub netmail: u32,
    /// Messages or files that failed and were skipped.
    pub errors: u32,
    /// Messages exported into outbound packets.
    pub exported: u32,
    /// Bundles written to the binkd outbound.
    pub bundles: u32,
}

impl TossStats {
    pub fn merge(&mut self, other: TossStats) {
        self.imported += other.imported;
        self.dupes += other.dupes;
        self.bad += other.bad;
        self.netmail += other.netmail;
        self.errors += other.errors;
        self.exported += other.exported;
        self.bundles += other.bundles;
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// One network's tosser.
pub struct Tosser {
    pub(crate) network: String,
    pub(crate) config: NetworkConfig,
    pub(crate) own_address: FtnAddress,
    pub(crate) areas: Arc<AreaManager>,
    pub(crate) dupes: DupeDb,
}

impl Tosser {
    pub fn new(
        network: impl Into<String>,
        config: NetworkConfig,
        areas: Arc<AreaManager>,
    ) -> crate::Result<Tosser> {
        let own_address = config.own_address()?;
        let dupes = DupeDb::load(
            &config.dupe_db_path,
            Duration::from_secs(config.dupe_max_age_days * 24 * 3600),
        );
        Ok(Tosser {
            network: network.into(),
            config,
            own_address,
            areas,
            dupes,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn own_address(&self) -> FtnAddress {
        self.own_address
    }

    pub fn dupes(&self) -> &DupeDb {
        &self.dupes
    }

    /// One full cycle: import inbound, export pending echomail, bundle the
    /// staged packets.
    pub fn run_once(&self) -> TossStats {
        let mut stats = self.process_inbound();
        stats.merge(self.scan_and_export());
        stats.merge(self.pack_outbound());
        self.dupes.purge();
        if let Err(e) = self.dupes.save() {
            log::error!("dupe db save after purge failed: {e}");
        }
        stats
    }

    /// Tick-driven poller. Runs a full cycle, sleeps for the configured
    /// interval (checking the cancellation flag along the way), repeats.
    /// A final dupe-DB save happens on the way out.
    pub fn poll_loop(&self, cancel: &AtomicBool) {
        let interval = Duration::from_secs(self.config.poll_interval_seconds.max(1));
        log::info!(
            "tosser for {} polling every {}s",
            self.network,
            interval.as_secs()
        );

        while !cancel.load(Ordering::Relaxed) {
            let stats = self.run_once();
            log::info!(
                "{}: imported {} (dupes {}, bad {}, netmail {}), exported {}, bundles {}, errors {}",
                self.network,
                stats.imported,
                stats.dupes,
                stats.bad,
                stats.netmail,
                stats.exported,
                stats.bundles,
                stats.errors
            );

            let mut remaining = interval;
            while !remaining.is_zero() && !cancel.load(Ordering::Relaxed) {
                let slice = remaining.min(Duration::from_millis(200));
                std::thread::sleep(slice);
                remaining -= slice;
            }
        }

        if let Err(e) = self.dupes.save() {
            log::error!("final dupe db save for {} failed: {e}", self.network);
        }
        log::info!("tosser for {} stopped", self.network);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_merge() {
        let mut a = TossStats {
            imported: 1,
            errors: 1,
            ..Default::default()
        };
        a.merge(TossStats {
            imported: 2,
            bundles: 1,
            ..Default::default()
        });
        assert_eq!(a.imported, 3);
        assert_eq!(a.bundles, 1);
        assert!(!a.is_clean());
    }
}
