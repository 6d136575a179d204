//! The `.bsy` cross-process lock.
//!
//! Acquisition creates the file with `O_CREAT | O_EXCL`; whoever wins the
//! race owns the base. Losers retry every 200 ms up to a 30 s deadline. A
//! lock file whose mtime is older than ten minutes belongs to a dead
//! process and is removed on sight.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::JamError;

const RETRY_INTERVAL: Duration = Duration::from_millis(200);
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Appends an extension to a base-path prefix (`/x/base` + `.bsy`).
pub(crate) fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(ext);
    PathBuf::from(os)
}

/// Holds the cross-process lock on a base; released on drop.
#[derive(Debug)]
pub struct BaseLock {
    path: PathBuf,
}

impl BaseLock {
    /// Acquires the lock for the base at `base_path`, waiting up to 30 s.
    pub fn acquire(base_path: &Path) -> crate::Result<BaseLock> {
        Self::acquire_with_timeout(base_path, LOCK_TIMEOUT)
    }

    pub(crate) fn acquire_with_timeout(
        base_path: &Path,
        timeout: Duration,
    ) -> crate::Result<BaseLock> {
        let path = sibling(base_path, ".bsy");
        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let stamp = OffsetDateTime::now_utc()
                        .format(&Rfc3339)
                        .unwrap_or_default();
                    let _ = writeln!(file, "pid={} time={}", std::process::id(), stamp);
                    return Ok(BaseLock { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        log::warn!("removing stale lock {}", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(JamError::LockTimeout);
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(JamError::Io(e)),
            }
        }
    }
}

fn is_stale(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        // Racing owner released it; the next create attempt decides.
        return false;
    };
    match meta.modified().map(|m| SystemTime::now().duration_since(m)) {
        Ok(Ok(age)) => age > STALE_AFTER,
        _ => false,
    }
}

impl Drop for BaseLock {
    fn drop(&mut self) {
        // Release must never fail the protected operation.
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to remove lock {}: {e}", self.path.display());
        }
    }
}
