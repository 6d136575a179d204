//! Area retention maintenance: message-count and age limits.
//!
//! Areas may carry `max_messages` and `max_age` limits. Enforcement deletes
//! the offending messages and compacts the base, oldest first; a limit of 0
//! means unlimited.

use ftn_jam::JamError;

use crate::areas::{AreaManager, MessageArea};
use crate::unix_now;

/// Counters reported by [`purge_area`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    /// Messages deleted by the age or count limit.
    pub deleted: u32,
    /// Whether the base was compacted afterwards.
    pub packed: bool,
}

/// Applies an area's retention limits: first the age cutoff, then the
/// message-count cap (dropping the oldest survivors). When anything was
/// deleted the base is packed and its reply threading rebuilt.
pub fn purge_area(areas: &AreaManager, area: &MessageArea) -> crate::Result<PurgeStats> {
    let mut stats = PurgeStats::default();
    if area.max_messages == 0 && area.max_age == 0 {
        return Ok(stats);
    }

    let base = areas.open_base(area.id)?;
    let count = base.count()?;

    if area.max_age > 0 {
        let cutoff = (unix_now() as u32).saturating_sub(area.max_age * 24 * 3600);
        for msg_num in 1..=count {
            let header = match base.read_message_header(msg_num) {
                Ok(header) => header,
                Err(JamError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            if !header.is_deleted() && header.date_written < cutoff {
                base.delete_message(msg_num)?;
                stats.deleted += 1;
            }
        }
    }

    if area.max_messages > 0 {
        let mut active = base.active_messages()?;
        for msg_num in 1..=count {
            if active <= area.max_messages {
                break;
            }
            let header = match base.read_message_header(msg_num) {
                Ok(header) => header,
                Err(JamError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            if !header.is_deleted() {
                base.delete_message(msg_num)?;
                active -= 1;
                stats.deleted += 1;
            }
        }
    }

    if stats.deleted > 0 {
        base.pack()?;
        base.link()?;
        stats.packed = true;
        log::info!(
            "purged {} messages from {} and packed the base",
            stats.deleted,
            area.tag
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::OffsetDateTime;

    use ftn_jam::{Message, MessageKind};

    use super::*;
    use crate::areas::AreaType;

    fn test_area(max_messages: u32, max_age: u32) -> MessageArea {
        MessageArea {
            id: 1,
            tag: "GENERAL".into(),
            name: "General".into(),
            acs_read: String::new(),
            acs_write: String::new(),
            base_path: "msgbases/general".into(),
            area_type: AreaType::Echomail,
            echo_tag: "GENERAL".into(),
            origin_addr: String::new(),
            network: "fidonet".into(),
            conference_id: 0,
            max_messages,
            max_age,
            sponsor: String::new(),
        }
    }

    fn write_messages(areas: &AreaManager, area: &MessageArea, stamps: &[i64]) {
        let base = areas.open_base(area.id).unwrap();
        for (i, stamp) in stamps.iter().enumerate() {
            let msg = Message {
                from: "Sysop".into(),
                to: "All".into(),
                subject: format!("msg {}", i + 1),
                written: OffsetDateTime::from_unix_timestamp(*stamp).unwrap(),
                text: "retention test".into(),
                orig_addr: "1:103/705".parse().ok(),
                ..Default::default()
            };
            base.write_message_ext(&msg, MessageKind::Echomail, "GENERAL", "", "")
                .unwrap();
        }
    }

    #[test]
    fn no_limits_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let area = test_area(0, 0);
        let areas = Arc::new(AreaManager::from_records(vec![area.clone()], dir.path()));
        write_messages(&areas, &area, &[1_700_000_000; 3]);

        let stats = purge_area(&areas, &area).unwrap();
        assert_eq!(stats, PurgeStats::default());
        assert_eq!(areas.open_base(1).unwrap().count().unwrap(), 3);
    }

    #[test]
    fn count_limit_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let area = test_area(3, 0);
        let areas = Arc::new(AreaManager::from_records(vec![area.clone()], dir.path()));
        write_messages(&areas, &area, &[1_700_000_000; 5]);

        let stats = purge_area(&areas, &area).unwrap();
        assert_eq!(stats.deleted, 2);
        assert!(stats.packed);

        let base = areas.open_base(1).unwrap();
        assert_eq!(base.count().unwrap(), 3);
        assert_eq!(base.read_message(1).unwrap().subject, "msg 3");
    }

    #[test]
    fn age_limit_drops_stale_messages() {
        let dir = tempfile::tempdir().unwrap();
        let area = test_area(0, 30);
        let areas = Arc::new(AreaManager::from_records(vec![area.clone()], dir.path()));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let stale = now - 40 * 24 * 3600;
        write_messages(&areas, &area, &[stale, stale, now]);

        let stats = purge_area(&areas, &area).unwrap();
        assert_eq!(stats.deleted, 2);

        let base = areas.open_base(1).unwrap();
        assert_eq!(base.count().unwrap(), 1);
        assert_eq!(base.read_message(1).unwrap().subject, "msg 3");
    }
}
