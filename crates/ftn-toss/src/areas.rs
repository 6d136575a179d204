//! Message-area registry: maps area ids and tags to JAM bases.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use ftn_jam::MessageBase;

use crate::TossError;

/// How an area participates in mail flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaType {
    Local,
    #[serde(alias = "echo")]
    Echomail,
    #[serde(alias = "direct")]
    Netmail,
}

/// One area record from `message_areas.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageArea {
    pub id: u32,
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub acs_read: String,
    #[serde(default)]
    pub acs_write: String,
    /// JAM base path prefix, relative to the data root.
    pub base_path: String,
    pub area_type: AreaType,
    #[serde(default)]
    pub echo_tag: String,
    #[serde(default)]
    pub origin_addr: String,
    /// Which network tosses this area; empty for purely local areas.
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub conference_id: u32,
    #[serde(default)]
    pub max_messages: u32,
    #[serde(default)]
    pub max_age: u32,
    #[serde(default)]
    pub sponsor: String,
}

/// Loaded area registry plus a cache of open JAM bases.
pub struct AreaManager {
    data_root: PathBuf,
    areas: BTreeMap<u32, MessageArea>,
    by_tag: HashMap<String, u32>,
    by_echo_tag: HashMap<String, u32>,
    bases: Mutex<HashMap<u32, Arc<MessageBase>>>,
}

impl AreaManager {
    /// Loads `message_areas.json`. Records repeating an id or tag are
    /// skipped with a warning; the first definition wins.
    pub fn load(path: &Path, data_root: impl Into<PathBuf>) -> crate::Result<AreaManager> {
        let bytes = fs::read(path).map_err(|e| {
            TossError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let records: Vec<MessageArea> = serde_json::from_slice(&bytes)?;
        Ok(Self::from_records(records, data_root))
    }

    pub fn from_records(records: Vec<MessageArea>, data_root: impl Into<PathBuf>) -> AreaManager {
        let mut areas = BTreeMap::new();
        let mut by_tag = HashMap::new();
        let mut by_echo_tag = HashMap::new();

        for area in records {
            if areas.contains_key(&area.id) {
                log::warn!("duplicate area id {}, skipping {:?}", area.id, area.tag);
                continue;
            }
            let tag_key = area.tag.to_uppercase();
            if by_tag.contains_key(&tag_key) {
                log::warn!("duplicate area tag {:?}, skipping", area.tag);
                continue;
            }
            by_tag.insert(tag_key, area.id);
            if !area.echo_tag.is_empty() {
                by_echo_tag
                    .entry(area.echo_tag.to_uppercase())
                    .or_insert(area.id);
            }
            areas.insert(area.id, area);
        }

        AreaManager {
            data_root: data_root.into(),
            areas,
            by_tag,
            by_echo_tag,
            bases: Mutex::new(HashMap::new()),
        }
    }

    /// All areas, ordered by id.
    pub fn list_areas(&self) -> Vec<&MessageArea> {
        self.areas.values().collect()
    }

    pub fn area_by_id(&self, id: u32) -> Option<&MessageArea> {
        self.areas.get(&id)
    }

    pub fn area_by_tag(&self, tag: &str) -> Option<&MessageArea> {
        self.by_tag
            .get(&tag.to_uppercase())
            .and_then(|id| self.areas.get(id))
    }

    pub fn area_by_echo_tag(&self, echo_tag: &str) -> Option<&MessageArea> {
        self.by_echo_tag
            .get(&echo_tag.to_uppercase())
            .and_then(|id| self.areas.get(id))
    }

    /// Echo-tag lookup constrained to one network, for tossers: two
    /// networks may legitimately carry the same echo tag.
    pub fn area_by_echo_tag_in_network(
        &self,
        echo_tag: &str,
        network: &str,
    ) -> Option<&MessageArea> {
        self.areas.values().find(|a| {
            a.network == network && a.echo_tag.eq_ignore_ascii_case(echo_tag)
        })
    }

    /// Opens the JAM base behind an area, or returns the cached handle.
    pub fn open_base(&self, area_id: u32) -> crate::Result<Arc<MessageBase>> {
        let area = self
            .area_by_id(area_id)
            .ok_or_else(|| TossError::AreaNotFound(format!("id {area_id}")))?;

        let mut bases = self
            .bases
            .lock()
            .map_err(|_| TossError::Config("base cache lock poisoned".into()))?;
        if let Some(base) = bases.get(&area_id) {
            return Ok(base.clone());
        }
        let base = Arc::new(MessageBase::open(self.data_root.join(&area.base_path))?);
        bases.insert(area_id, base.clone());
        Ok(base)
    }

    /// Serializes all areas back to disk, sorted by id, atomically.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let records: Vec<&MessageArea> = self.areas.values().collect();
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = {
            let mut os = path.as_os_str().to_os_string();
            os.push(".tmp");
            PathBuf::from(os)
        };
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(id: u32, tag: &str, echo_tag: &str, network: &str) -> MessageArea {
        MessageArea {
            id,
            tag: tag.into(),
            name: format!("{tag} area"),
            acs_read: String::new(),
            acs_write: String::new(),
            base_path: format!("msgbases/{}", tag.to_lowercase()),
            area_type: if echo_tag.is_empty() {
                AreaType::Local
            } else {
                AreaType::Echomail
            },
            echo_tag: echo_tag.into(),
            origin_addr: String::new(),
            network: network.into(),
            conference_id: 0,
            max_messages: 0,
            max_age: 0,
            sponsor: String::new(),
        }
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mgr = AreaManager::from_records(
            vec![area(1, "General", "GENERAL", "fidonet")],
            "/tmp/data",
        );
        assert_eq!(mgr.area_by_tag("gEnErAl").unwrap().id, 1);
        assert_eq!(mgr.area_by_echo_tag("general").unwrap().id, 1);
        assert!(mgr.area_by_tag("missing").is_none());
    }

    #[test]
    fn duplicates_are_skipped() {
        let mgr = AreaManager::from_records(
            vec![
                area(1, "ONE", "E1", "fidonet"),
                area(1, "OTHER", "E2", "fidonet"),
                area(2, "one", "E3", "fidonet"),
                area(3, "THREE", "E1", "othernet"),
            ],
            "/tmp/data",
        );
        // Second id-1 record and the tag-colliding id-2 record are dropped.
        assert_eq!(mgr.list_areas().len(), 2);
        assert_eq!(mgr.area_by_tag("ONE").unwrap().id, 1);
        assert_eq!(mgr.area_by_echo_tag("E1").unwrap().id, 1);
    }

    #[test]
    fn network_constrained_echo_lookup() {
        let mgr = AreaManager::from_records(
            vec![
                area(1, "FIDO_GEN", "GENERAL", "fidonet"),
                area(2, "OTHER_GEN", "GENERAL", "othernet"),
            ],
            "/tmp/data",
        );
        assert_eq!(
            mgr.area_by_echo_tag_in_network("general", "othernet").unwrap().id,
            2
        );
        assert_eq!(
            mgr.area_by_echo_tag_in_network("GENERAL", "fidonet").unwrap().id,
            1
        );
        assert!(mgr.area_by_echo_tag_in_network("GENERAL", "thirdnet").is_none());
    }

    #[test]
    fn list_is_sorted_by_id() {
        let mgr = AreaManager::from_records(
            vec![
                area(9, "NINE", "", ""),
                area(2, "TWO", "", ""),
                area(5, "FIVE", "", ""),
            ],
            "/tmp/data",
        );
        let ids: Vec<u32> = mgr.list_areas().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_areas.json");
        let mgr = AreaManager::from_records(
            vec![area(2, "TWO", "", ""), area(1, "ONE", "E1", "fidonet")],
            dir.path(),
        );
        mgr.save(&path).unwrap();

        let reloaded = AreaManager::load(&path, dir.path()).unwrap();
        assert_eq!(reloaded.list_areas().len(), 2);
        assert_eq!(reloaded.area_by_tag("ONE").unwrap().echo_tag, "E1");
    }
}
