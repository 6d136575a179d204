//! Inbound processing: sweep the inbound directories, unpack bundles,
//! parse packets, route messages into JAM bases.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use ftn_jam::{Message, MessageKind};
use ftn_msg::body::{ParsedBody, parse_body};
use ftn_msg::packet::{PackedMessage, PacketHeader, read_packet};
use ftn_msg::{FtnAddress, parse_ftn_datetime};

use crate::areas::MessageArea;
use crate::bundle::{bundle_extension, extract_bundle, is_zip_bundle};
use crate::tosser::{TossStats, Tosser};
use crate::{TossError, unix_now};

/// What became of one packet.
enum PktOutcome {
    /// The packet belongs to another network's tosser; leave it alone.
    Foreign,
    Processed(TossStats),
}

/// What became of one message.
enum MsgOutcome {
    Imported,
    ImportedBad,
    Dupe,
    Netmail,
}

impl Tosser {
    /// Sweeps the network's inbound directories once, saving the dupe DB
    /// at the end.
    pub fn process_inbound(&self) -> TossStats {
        let mut stats = TossStats::default();

        let mut dirs: Vec<&Path> = vec![self.config.inbound.as_path()];
        if let Some(secure) = &self.config.secure_inbound {
            if secure != &self.config.inbound {
                dirs.push(secure.as_path());
            }
        }

        for dir in dirs {
            stats.merge(self.process_inbound_dir(dir));
        }

        if let Err(e) = self.dupes.save() {
            log::error!("dupe db save failed: {e}");
        }
        stats
    }

    fn process_inbound_dir(&self, dir: &Path) -> TossStats {
        let mut stats = TossStats::default();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::trace!("inbound {} not readable: {e}", dir.display());
                return stats;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        files.sort();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if name.to_ascii_lowercase().ends_with(".pkt") {
                stats.merge(self.handle_inbound_packet(&path));
            } else if bundle_extension(&name) {
                stats.merge(self.handle_inbound_bundle(&path));
            }
        }
        stats
    }

    /// A bare packet dropped into the inbound.
    fn handle_inbound_packet(&self, path: &Path) -> TossStats {
        let mut stats = TossStats::default();
        match self.toss_pkt(path) {
            Ok(PktOutcome::Foreign) => {
                log::trace!("leaving foreign packet {}", path.display());
            }
            Ok(PktOutcome::Processed(pkt_stats)) => {
                stats.merge(pkt_stats);
                if pkt_stats.is_clean() {
                    let _ = fs::remove_file(path);
                } else {
                    self.quarantine(path);
                }
            }
            Err(e) => {
                log::error!("packet {} unreadable: {e}", path.display());
                stats.errors += 1;
                self.quarantine(path);
            }
        }
        stats
    }

    fn handle_inbound_bundle(&self, path: &Path) -> TossStats {
        let mut stats = TossStats::default();

        match is_zip_bundle(path) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("{} has a bundle name but no ZIP magic", path.display());
                return stats;
            }
            Err(e) => {
                log::error!("cannot probe {}: {e}", path.display());
                stats.errors += 1;
                return stats;
            }
        }

        let unpack_dir = self.config.temp.join("unpack");
        let packets = match extract_bundle(path, &unpack_dir) {
            Ok(packets) => packets,
            Err(e) => {
                log::error!("cannot extract {}: {e}", path.display());
                stats.errors += 1;
                self.quarantine(path);
                return stats;
            }
        };

        let mut all_foreign = !packets.is_empty();
        for packet in &packets {
            match self.toss_pkt(packet) {
                Ok(PktOutcome::Foreign) => {
                    let _ = fs::remove_file(packet);
                }
                Ok(PktOutcome::Processed(pkt_stats)) => {
                    all_foreign = false;
                    stats.merge(pkt_stats);
                    if pkt_stats.is_clean() {
                        let _ = fs::remove_file(packet);
                    } else {
                        self.quarantine(packet);
                    }
                }
                Err(e) => {
                    all_foreign = false;
                    log::error!("packet {} unreadable: {e}", packet.display());
                    stats.errors += 1;
                    self.quarantine(packet);
                }
            }
        }

        if all_foreign {
            // Every packet was somebody else's; leave the bundle for the
            // tosser it belongs to.
            log::trace!("bundle {} is foreign, leaving in place", path.display());
        } else {
            let _ = fs::remove_file(path);
        }
        stats
    }

    /// Moves a problem file into the temp directory for post-mortem.
    fn quarantine(&self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        if fs::create_dir_all(&self.config.temp).is_err() {
            return;
        }
        let dest = self.config.temp.join(name);
        if let Err(e) = fs::rename(path, &dest) {
            // Cross-device fallback.
            if fs::copy(path, &dest).is_err() {
                log::error!("cannot quarantine {}: {e}", path.display());
                return;
            }
            let _ = fs::remove_file(path);
        }
        log::warn!("moved {} to {}", path.display(), dest.display());
    }

    /// Parses one packet and tosses its messages.
    fn toss_pkt(&self, path: &Path) -> crate::Result<PktOutcome> {
        let (header, messages) = read_packet(File::open(path)?)?;

        // Ownership filter: only process packets originated by one of our
        // links. Should no link address parse at all, accept rather than
        // stall the inbound forever.
        let orig = header.orig_address();
        let mut any_link_parsed = false;
        let mut ours = false;
        for link in &self.config.links {
            if let Ok(addr) = link.address.parse::<FtnAddress>() {
                any_link_parsed = true;
                if addr.zone == orig.zone && addr.net == orig.net && addr.node == orig.node {
                    ours = true;
                    break;
                }
            }
        }
        if any_link_parsed && !ours {
            return Ok(PktOutcome::Foreign);
        }

        let mut stats = TossStats::default();
        for message in &messages {
            match self.toss_message(&header, message) {
                Ok(MsgOutcome::Imported) => stats.imported += 1,
                Ok(MsgOutcome::ImportedBad) => {
                    stats.imported += 1;
                    stats.bad += 1;
                }
                Ok(MsgOutcome::Dupe) => stats.dupes += 1,
                Ok(MsgOutcome::Netmail) => stats.netmail += 1,
                Err(e) => {
                    log::error!(
                        "message {:?} from {} failed: {e}",
                        message.subject,
                        path.display()
                    );
                    stats.errors += 1;
                }
            }
        }
        log::info!(
            "tossed {}: {} imported, {} dupes, {} netmail, {} errors",
            path.display(),
            stats.imported,
            stats.dupes,
            stats.netmail,
            stats.errors
        );
        Ok(PktOutcome::Processed(stats))
    }

    /// Routes one packed message: netmail, dupe, known area or bad area.
    fn toss_message(
        &self,
        pkt_header: &PacketHeader,
        packed: &PackedMessage,
    ) -> crate::Result<MsgOutcome> {
        let body = parse_body(&packed.body);
        let msgid = body.kludge("MSGID:").unwrap_or_default().to_string();

        let Some(area_tag) = body.area.clone() else {
            // No AREA line makes it netmail.
            let Some(tag) = &self.config.netmail_area else {
                return Err(TossError::Config(format!(
                    "netmail for {:?} but no netmail area configured",
                    packed.to
                )));
            };
            let area = self
                .areas
                .area_by_tag(tag)
                .ok_or_else(|| TossError::AreaNotFound(tag.clone()))?;
            self.write_msg_to_area(area, pkt_header, packed, &body, &msgid)?;
            return Ok(MsgOutcome::Netmail);
        };

        // Dupe check comes before area routing; the insertion also claims
        // the MSGID so a crash cannot double-import it.
        if self.dupes.add(&msgid) {
            log::trace!("duplicate {msgid:?} ({:?})", packed.subject);
            if let Some(tag) = &self.config.dupe_area {
                if let Some(area) = self.areas.area_by_tag(tag) {
                    self.write_msg_to_area(area, pkt_header, packed, &body, &msgid)?;
                }
            }
            return Ok(MsgOutcome::Dupe);
        }

        let area = self
            .areas
            .area_by_tag(&area_tag)
            .or_else(|| self.areas.area_by_echo_tag_in_network(&area_tag, &self.network));
        match area {
            Some(area) => {
                self.write_msg_to_area(area, pkt_header, packed, &body, &msgid)?;
                Ok(MsgOutcome::Imported)
            }
            None => {
                let Some(tag) = &self.config.bad_area else {
                    return Err(TossError::AreaNotFound(area_tag));
                };
                let bad = self
                    .areas
                    .area_by_tag(tag)
                    .ok_or_else(|| TossError::AreaNotFound(tag.clone()))?;
                log::warn!("unknown echo {area_tag:?}, routing to {}", bad.tag);
                self.write_msg_to_area(bad, pkt_header, packed, &body, &msgid)?;
                Ok(MsgOutcome::ImportedBad)
            }
        }
    }

    /// Builds the JAM message and appends it to the area's base.
    ///
    /// The stored text is the visible text only; AREA, kludges, SEEN-BY and
    /// PATH all live in subfields. Right after the append the header is
    /// re-stamped with `date_processed = now`: the message came from the
    /// wire, so the outbound scanner must not re-export it.
    fn write_msg_to_area(
        &self,
        area: &MessageArea,
        pkt_header: &PacketHeader,
        packed: &PackedMessage,
        body: &ParsedBody,
        msgid: &str,
    ) -> crate::Result<()> {
        let kind = if body.area.is_some() {
            MessageKind::Echomail
        } else {
            MessageKind::Netmail
        };

        // Zone fallback chain for the origin: packet header zone, QMail
        // zone, then our own.
        let mut orig = pkt_header.orig_address();
        if orig.zone == 0 {
            orig.zone = self.own_address.zone;
        }
        orig.net = packed.orig_net;
        orig.node = packed.orig_node;

        let mut reply_id = String::new();
        let mut pid = String::new();
        let mut kludges = Vec::new();
        for kludge in &body.kludges {
            if kludge.starts_with("MSGID:") {
                continue;
            }
            if let Some(rest) = kludge.strip_prefix("REPLY:") {
                if reply_id.is_empty() {
                    // Keep only the `addr unique` form; anything after the
                    // second token is line noise from broken tossers.
                    let mut tokens = rest.split_whitespace();
                    reply_id = match (tokens.next(), tokens.next()) {
                        (Some(addr), Some(unique)) => format!("{addr} {unique}"),
                        (Some(addr), None) => addr.to_string(),
                        _ => String::new(),
                    };
                }
                continue;
            }
            if let Some(rest) = kludge.strip_prefix("PID:") {
                if pid.is_empty() {
                    pid = rest.trim().to_string();
                }
                continue;
            }
            kludges.push(kludge.clone());
        }

        // Echomail picks up our own node in SEEN-BY and PATH; netmail has
        // no business with either.
        let (seen_by, path) = match kind {
            MessageKind::Echomail => (
                appended_2d_list(&body.seen_by, &self.own_address, true),
                appended_2d_list(&body.path, &self.own_address, false),
            ),
            _ => (String::new(), String::new()),
        };

        let mut dest_addr = None;
        if kind == MessageKind::Netmail {
            let mut dest = pkt_header.dest_address();
            if dest.zone == 0 {
                dest.zone = self.own_address.zone;
            }
            dest.net = packed.dest_net;
            dest.node = packed.dest_node;
            apply_netmail_kludges(&body.kludges, &mut orig, &mut dest);
            dest_addr = Some(dest);
        }

        let mut attributes = ftn_jam::MessageAttributes::new();
        attributes.set_private(packed.attributes.private());
        attributes.set_crash(packed.attributes.crash());
        attributes.set_hold(packed.attributes.hold());

        let msg = Message {
            from: packed.from.clone(),
            to: packed.to.clone(),
            subject: packed.subject.clone(),
            written: parse_ftn_datetime(&packed.date_time)
                .unwrap_or_else(|_| time::OffsetDateTime::now_utc()),
            text: body.text.clone(),
            orig_addr: Some(orig),
            dest_addr,
            msg_id: msgid.to_string(),
            reply_id,
            pid,
            flags: String::new(),
            seen_by,
            path,
            kludges,
            attributes,
        };

        let base = self.areas.open_base(area.id)?;
        let msg_num = base.write_message_ext(&msg, kind, &area.echo_tag, "", "")?;

        let mut header = base.read_message_header(msg_num)?;
        header.date_processed = unix_now() as u32;
        base.update_message_header(msg_num, &header)?;

        log::trace!(
            "stored {:?} as {} #{msg_num} in {}",
            packed.subject,
            match kind {
                MessageKind::Netmail => "netmail",
                _ => "echomail",
            },
            area.tag
        );
        Ok(())
    }
}

/// Refines netmail addressing from its control kludges (FSC-0004): `INTL`
/// carries the 3-D destination and origin, `FMPT`/`TOPT` the origin and
/// destination points. Packed-message records have no zone or point fields
/// of their own.
fn apply_netmail_kludges(kludges: &[String], orig: &mut FtnAddress, dest: &mut FtnAddress) {
    for kludge in kludges {
        if let Some(rest) = kludge.strip_prefix("INTL") {
            let mut parts = rest.split_whitespace();
            if let (Some(d), Some(o)) = (parts.next(), parts.next()) {
                if let Ok(d) = d.parse::<FtnAddress>() {
                    (dest.zone, dest.net, dest.node) = (d.zone, d.net, d.node);
                }
                if let Ok(o) = o.parse::<FtnAddress>() {
                    (orig.zone, orig.net, orig.node) = (o.zone, o.net, o.node);
                }
            }
        } else if let Some(rest) = kludge.strip_prefix("FMPT") {
            if let Ok(point) = rest.trim().parse() {
                orig.point = point;
            }
        } else if let Some(rest) = kludge.strip_prefix("TOPT") {
            if let Ok(point) = rest.trim().parse() {
                dest.point = point;
            }
        }
    }
}

/// Flattens SEEN-BY/PATH lines into a single space-joined string with our
/// own 2-D address appended. SEEN-BY entries stay unique; PATH appends
/// whenever we are not already the last hop.
pub(crate) fn appended_2d_list(lines: &[String], own: &FtnAddress, unique: bool) -> String {
    let mut entries: Vec<String> = lines
        .iter()
        .flat_map(|line| line.split_whitespace())
        .map(str::to_string)
        .collect();
    let two_d = own.two_d();
    let append = if unique {
        !entries.iter().any(|e| *e == two_d)
    } else {
        entries.last().map(|last| *last != two_d).unwrap_or(true)
    };
    if append {
        entries.push(two_d);
    }
    entries.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netmail_kludges_refine_addresses() {
        let mut orig = FtnAddress::new(1, 104, 56);
        let mut dest = FtnAddress::new(1, 103, 705);
        let kludges = vec![
            "INTL 2:5020/1042 1:104/56".to_string(),
            "FMPT 3".to_string(),
            "TOPT 7".to_string(),
        ];
        apply_netmail_kludges(&kludges, &mut orig, &mut dest);
        assert_eq!(orig, "1:104/56.3".parse().unwrap());
        assert_eq!(dest, "2:5020/1042.7".parse().unwrap());
    }

    #[test]
    fn malformed_netmail_kludges_are_ignored() {
        let mut orig = FtnAddress::new(1, 104, 56);
        let mut dest = FtnAddress::new(1, 103, 705);
        let kludges = vec!["INTL garbage".to_string(), "FMPT x".to_string()];
        apply_netmail_kludges(&kludges, &mut orig, &mut dest);
        assert_eq!(orig, FtnAddress::new(1, 104, 56));
        assert_eq!(dest, FtnAddress::new(1, 103, 705));
    }

    #[test]
    fn seen_by_append_is_unique() {
        let own = FtnAddress::new(1, 103, 705);
        let lines = vec!["103/705 104/56".to_string()];
        assert_eq!(appended_2d_list(&lines, &own, true), "103/705 104/56");

        let lines = vec!["104/56".to_string()];
        assert_eq!(appended_2d_list(&lines, &own, true), "104/56 103/705");
    }

    #[test]
    fn path_appends_unless_last_hop() {
        let own = FtnAddress::new(1, 103, 705);
        let lines = vec!["103/705 104/56".to_string()];
        assert_eq!(
            appended_2d_list(&lines, &own, false),
            "103/705 104/56 103/705"
        );
        let lines = vec!["104/56 103/705".to_string()];
        assert_eq!(appended_2d_list(&lines, &own, false), "104/56 103/705");
        assert_eq!(appended_2d_list(&[], &own, false), "103/705");
    }
}
