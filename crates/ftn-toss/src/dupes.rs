//! The persistent MSGID dupe database.
//!
//! A flat JSON map of MSGID to first-seen unix time. Insertion happens
//! before the message is written to a base, so a crash between the two can
//! lose a message but never let a duplicate through on the next run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::unix_now;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DupeEntries {
    entries: BTreeMap<String, u64>,
}

/// MSGID → first-seen map with age-based purge.
#[derive(Debug)]
pub struct DupeDb {
    path: PathBuf,
    max_age: Duration,
    inner: Mutex<DupeEntries>,
}

impl DupeDb {
    /// Loads the database, starting empty when the file is missing or
    /// unreadable. Corruption is logged, not fatal.
    pub fn load(path: impl Into<PathBuf>, max_age: Duration) -> DupeDb {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("dupe db {} is corrupt ({e}), starting empty", path.display());
                    DupeEntries::default()
                }
            },
            Err(_) => DupeEntries::default(),
        };
        DupeDb {
            path,
            max_age,
            inner: Mutex::new(entries),
        }
    }

    /// Records a MSGID, returning `true` when it was already known. An
    /// empty MSGID is never stored and never counts as seen.
    pub fn add(&self, msgid: &str) -> bool {
        if msgid.is_empty() {
            return false;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.entries.contains_key(msgid) {
            return true;
        }
        inner.entries.insert(msgid.to_string(), unix_now());
        false
    }

    pub fn contains(&self, msgid: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains_key(msgid))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries older than the configured maximum age.
    pub fn purge(&self) {
        let cutoff = unix_now().saturating_sub(self.max_age.as_secs());
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let before = inner.entries.len();
        inner.entries.retain(|_, first_seen| *first_seen >= cutoff);
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            log::info!("purged {dropped} dupe entries older than {:?}", self.max_age);
        }
    }

    /// Writes the database atomically through a temporary sibling.
    pub fn save(&self) -> crate::Result<()> {
        let json = {
            let inner = self
                .inner
                .lock()
                .map_err(|_| crate::TossError::Config("dupe db lock poisoned".into()))?;
            serde_json::to_vec_pretty(&*inner)?
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_sibling(&self.path);
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
