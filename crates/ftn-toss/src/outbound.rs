//! Outbound processing: scan echomail areas from their high-water marks,
//! build per-link packets, bundle staged packets into ZIPs and announce
//! them through BSO flow files.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;

use ftn_jam::{JamError, Message, MessageBase, PRODUCT_ID};
use ftn_msg::body::{ParsedBody, format_body};
use ftn_msg::packet::{
    PackedAttributes, PackedMessage, PacketHeader, read_header_from_file, write_packet,
};
use ftn_msg::format_ftn_datetime;

use crate::areas::AreaType;
use crate::bundle::{bundle_filename, create_bundle};
use crate::config::{LinkConfig, LinkFlavour};
use crate::inbound::appended_2d_list;
use crate::tosser::{TossStats, Tosser};
use crate::unix_now;

/// A message waiting to be exported; holds its base open until the write
/// phase has finished with it.
struct PendingMsg {
    base: Arc<MessageBase>,
    msg_num: u32,
    echo_tag: String,
    msg: Message,
}

impl Tosser {
    /// Scans every echomail area of this network for messages with
    /// `date_processed == 0`, builds one packet per subscribed link, then
    /// stamps the exported messages and advances the high-water marks.
    pub fn scan_and_export(&self) -> TossStats {
        let mut stats = TossStats::default();
        let mut pending: Vec<PendingMsg> = Vec::new();
        let mut queues: HashMap<usize, Vec<usize>> = HashMap::new();

        for area in self.areas.list_areas() {
            if area.area_type != AreaType::Echomail || area.network != self.network {
                continue;
            }
            let base = match self.areas.open_base(area.id) {
                Ok(base) => base,
                Err(e) => {
                    log::error!("cannot open base for {}: {e}", area.tag);
                    stats.errors += 1;
                    continue;
                }
            };
            match self.scan_area_pending(&base, &area.echo_tag) {
                Ok(area_pending) => {
                    for p in area_pending {
                        let idx = pending.len();
                        let mut queued = false;
                        for (li, link) in self.config.links.iter().enumerate() {
                            if link.carries_echo(&p.echo_tag) {
                                queues.entry(li).or_default().push(idx);
                                queued = true;
                            }
                        }
                        if queued {
                            pending.push(p);
                        } else {
                            log::trace!(
                                "no link subscribes to {}, leaving message {} pending",
                                p.echo_tag,
                                p.msg_num
                            );
                        }
                    }
                }
                Err(e) => {
                    log::error!("scanning {} failed: {e}", area.tag);
                    stats.errors += 1;
                }
            }
        }

        // Write one packet per link; stamp a message as exported only once
        // at least one packet carrying it has safely landed on disk.
        let mut exported: BTreeSet<usize> = BTreeSet::new();
        for (li, indices) in &queues {
            let link = &self.config.links[*li];
            let msgs: Vec<&PendingMsg> = indices.iter().map(|&i| &pending[i]).collect();
            match self.create_outbound_packet(link, &msgs) {
                Ok(path) => {
                    log::info!(
                        "packed {} messages for {} into {}",
                        msgs.len(),
                        link.address,
                        path.display()
                    );
                    exported.extend(indices.iter().copied());
                }
                Err(e) => {
                    log::error!("packet for {} failed: {e}", link.address);
                    stats.errors += 1;
                }
            }
        }

        for idx in exported {
            let p = &pending[idx];
            match self.stamp_exported(p) {
                Ok(()) => stats.exported += 1,
                Err(e) => {
                    log::error!(
                        "cannot stamp message {} in {}: {e}",
                        p.msg_num,
                        p.echo_tag
                    );
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// Collects this area's unexported messages, advancing the stored mark
    /// across the leading run of already-processed ones.
    fn scan_area_pending(
        &self,
        base: &Arc<MessageBase>,
        echo_tag: &str,
    ) -> crate::Result<Vec<PendingMsg>> {
        let hwm = base.hwm()?;
        let count = base.count()?;
        let mut contiguous = hwm;
        let mut out = Vec::new();

        for msg_num in (hwm + 1)..=count {
            let header = match base.read_message_header(msg_num) {
                Ok(header) => header,
                Err(JamError::NotFound) => {
                    // An index hole can never become exportable.
                    if msg_num == contiguous + 1 {
                        contiguous = msg_num;
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if header.date_processed != 0 {
                if msg_num == contiguous + 1 {
                    contiguous = msg_num;
                }
                continue;
            }
            if header.is_deleted() {
                continue;
            }
            out.push(PendingMsg {
                base: base.clone(),
                msg_num,
                echo_tag: echo_tag.to_string(),
                msg: base.read_message(msg_num)?,
            });
        }

        if contiguous > hwm {
            base.set_hwm(contiguous)?;
        }
        Ok(out)
    }

    /// Builds a Type-2+ packet for one link and writes it into the staging
    /// directory via a temporary file.
    fn create_outbound_packet(
        &self,
        link: &LinkConfig,
        msgs: &[&PendingMsg],
    ) -> crate::Result<PathBuf> {
        let dest = link.address()?;
        let mut header = PacketHeader::new(self.own_address, dest, OffsetDateTime::now_utc());
        header.set_password(&link.pkt_password);

        let mut packed = Vec::with_capacity(msgs.len());
        for p in msgs {
            let msg = &p.msg;

            let mut body = ParsedBody {
                area: Some(p.echo_tag.clone()),
                ..Default::default()
            };
            if !msg.msg_id.is_empty() {
                body.kludges.push(format!("MSGID: {}", msg.msg_id));
            }
            if !msg.reply_id.is_empty() {
                body.kludges.push(format!("REPLY: {}", msg.reply_id));
            }
            let pid = if msg.pid.is_empty() { PRODUCT_ID } else { msg.pid.as_str() };
            body.kludges.push(format!("PID: {pid}"));
            body.kludges.extend(msg.kludges.iter().cloned());
            body.text = msg.text.clone();

            let seen_by = appended_2d_list(
                std::slice::from_ref(&msg.seen_by),
                &self.own_address,
                true,
            );
            if !seen_by.is_empty() {
                body.seen_by.push(seen_by);
            }
            let path = appended_2d_list(
                std::slice::from_ref(&msg.path),
                &self.own_address,
                false,
            );
            if !path.is_empty() {
                body.path.push(path);
            }

            let mut attributes = PackedAttributes::new().with_local(true);
            match link.flavour {
                LinkFlavour::Crash => attributes.set_crash(true),
                LinkFlavour::Hold => attributes.set_hold(true),
                LinkFlavour::Normal | LinkFlavour::Direct => {}
            }

            packed.push(PackedMessage {
                orig_node: self.own_address.node,
                dest_node: dest.node,
                orig_net: self.own_address.net,
                dest_net: dest.net,
                attributes,
                cost: 0,
                date_time: format_ftn_datetime(msg.written),
                to: msg.to.clone(),
                from: msg.from.clone(),
                subject: msg.subject.clone(),
                body: format_body(&body),
            });
        }

        fs::create_dir_all(&self.config.outbound)?;
        let (final_path, tmp_path) = loop {
            let name = format!("{:08x}.pkt", rand::random::<u32>());
            let final_path = self.config.outbound.join(&name);
            if !final_path.exists() {
                break (final_path, self.config.outbound.join(format!("{name}.tmp")));
            }
        };

        let result = (|| -> crate::Result<()> {
            let mut file = File::create(&tmp_path)?;
            write_packet(&mut file, &header, &packed)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }

    fn stamp_exported(&self, p: &PendingMsg) -> crate::Result<()> {
        let mut header = p.base.read_message_header(p.msg_num)?;
        header.date_processed = unix_now() as u32;
        p.base.update_message_header(p.msg_num, &header)?;
        p.base.set_hwm(p.msg_num)?;
        Ok(())
    }

    /// Groups staged packets by destination link, bundles each group into
    /// the binkd outbound and emits the link's flow file.
    pub fn pack_outbound(&self) -> TossStats {
        let mut stats = TossStats::default();

        let entries = match fs::read_dir(&self.config.outbound) {
            Ok(entries) => entries,
            Err(_) => return stats,
        };
        let mut packets: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pkt"))
                    .unwrap_or(false)
            })
            .collect();
        packets.sort();
        if packets.is_empty() {
            return stats;
        }

        // Bundle routing matches on (net, node) only; hubs expect bundles
        // addressed to their main node regardless of zone or point.
        let mut groups: HashMap<usize, Vec<PathBuf>> = HashMap::new();
        for packet in packets {
            let header = match read_header_from_file(&packet) {
                Ok(header) => header,
                Err(e) => {
                    log::error!("unreadable staged packet {}: {e}", packet.display());
                    stats.errors += 1;
                    continue;
                }
            };
            let link = self.config.links.iter().position(|l| {
                l.address()
                    .map(|a| a.same_node(header.dest_net, header.dest_node))
                    .unwrap_or(false)
            });
            match link {
                Some(li) => groups.entry(li).or_default().push(packet),
                None => log::warn!(
                    "no link for staged packet {} (dest {}/{})",
                    packet.display(),
                    header.dest_net,
                    header.dest_node
                ),
            }
        }

        let dow = OffsetDateTime::now_utc()
            .weekday()
            .number_days_from_monday() as usize;

        for (li, group) in groups {
            let link = &self.config.links[li];
            let dest = match link.address() {
                Ok(dest) => dest,
                Err(e) => {
                    log::error!("{e}");
                    stats.errors += 1;
                    continue;
                }
            };

            if let Err(e) = fs::create_dir_all(&self.config.binkd_outbound) {
                log::error!("cannot create binkd outbound: {e}");
                stats.errors += 1;
                continue;
            }
            let bundle_path = (0..=9u8)
                .map(|overflow| {
                    self.config
                        .binkd_outbound
                        .join(bundle_filename(dest.net, dest.node, dow, overflow))
                })
                .find(|p| !p.exists())
                .unwrap_or_else(|| {
                    // A full day of bundles; fall back to a unique name.
                    self.config
                        .binkd_outbound
                        .join(format!("{:04x}{:04x}_{}.zip", dest.net, dest.node, unix_now()))
                });

            match create_bundle(&bundle_path, &group) {
                Ok(count) if count > 0 => {
                    log::info!(
                        "bundled {count} packets for {} into {}",
                        link.address,
                        bundle_path.display()
                    );
                    stats.bundles += 1;
                    for packet in &group {
                        let _ = fs::remove_file(packet);
                    }
                    if let Err(e) = self.emit_flow_file(link, &dest, &bundle_path) {
                        log::error!("flow file for {} failed: {e}", link.address);
                        stats.errors += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!(
                        "bundling for {} failed: {e}; packets left for retry",
                        link.address
                    );
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// Appends the bundle to the link's BSO flow file. The `^` prefix asks
    /// the transport to delete the bundle once it has been sent.
    fn emit_flow_file(
        &self,
        link: &LinkConfig,
        dest: &ftn_msg::FtnAddress,
        bundle_path: &std::path::Path,
    ) -> crate::Result<()> {
        let Some(ext) = link.flavour.flow_extension() else {
            return Ok(());
        };
        let flow_path = self
            .config
            .binkd_outbound
            .join(format!("{:04x}{:04x}.{ext}", dest.net, dest.node));
        let absolute = fs::canonicalize(bundle_path)?;
        let mut flow = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&flow_path)?;
        writeln!(flow, "^{}", absolute.display())?;
        Ok(())
    }
}
