//! End-to-end exercises of the JAM base against a scratch directory.

use std::fs;

use ftn_jam::{HWM_USER, JamError, Message, MessageBase, MessageKind};
use tempfile::TempDir;
use time::OffsetDateTime;

fn scratch_base(dir: &TempDir) -> MessageBase {
    MessageBase::open(dir.path().join("msgbases/general/area")).unwrap()
}

fn echo_message(subject: &str) -> Message {
    Message {
        from: "Sysop".into(),
        to: "All".into(),
        subject: subject.into(),
        written: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        text: "Hello World!".into(),
        orig_addr: "1:103/705".parse().ok(),
        ..Default::default()
    }
}

#[test]
fn create_produces_exact_fixed_header() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    assert_eq!(base.count().unwrap(), 0);

    let jhr = dir.path().join("msgbases/general/area.jhr");
    assert_eq!(fs::metadata(&jhr).unwrap().len(), 1024);
    for ext in ["jdt", "jdx", "jlr"] {
        let path = dir.path().join(format!("msgbases/general/area.{ext}"));
        assert_eq!(fs::metadata(&path).unwrap().len(), 0, "{ext} not empty");
    }
}

#[test]
fn short_header_file_is_recreated() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("area");
    drop(MessageBase::open(&prefix).unwrap());

    // Truncate .jhr to 1023 bytes; reopening must rebuild the base.
    let jhr = dir.path().join("area.jhr");
    let bytes = fs::read(&jhr).unwrap();
    fs::write(&jhr, &bytes[..1023]).unwrap();

    let base = MessageBase::open(&prefix).unwrap();
    assert_eq!(fs::metadata(&jhr).unwrap().len(), 1024);
    assert_eq!(base.count().unwrap(), 0);
}

#[test]
fn corrupt_signature_is_recreated() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("area");
    drop(MessageBase::open(&prefix).unwrap());

    let jhr = dir.path().join("area.jhr");
    let mut bytes = fs::read(&jhr).unwrap();
    bytes[..4].copy_from_slice(b"XXXX");
    fs::write(&jhr, &bytes).unwrap();

    let base = MessageBase::open(&prefix).unwrap();
    assert_eq!(base.count().unwrap(), 0);
    assert_eq!(base.active_messages().unwrap(), 0);
}

#[test]
fn write_and_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    let mut msg = echo_message("Test Subject");
    msg.reply_id = "1:103/705 00000001".into();
    msg.kludges = vec!["TZUTC: 0000".into(), "CHRS: CP437 2".into()];
    msg.seen_by = "103/705 104/56".into();
    msg.path = "103/705".into();

    let n = base
        .write_message_ext(&msg, MessageKind::Echomail, "GENERAL", "Test BBS", "")
        .unwrap();
    assert_eq!(n, 1);

    let read = base.read_message(1).unwrap();
    assert_eq!(read.from, "Sysop");
    assert_eq!(read.to, "All");
    assert_eq!(read.subject, "Test Subject");
    assert_eq!(read.orig_addr, msg.orig_addr);
    assert!(!read.msg_id.is_empty(), "echomail MSGID was not generated");
    assert_eq!(read.reply_id, msg.reply_id);
    assert_eq!(read.seen_by, msg.seen_by);
    assert_eq!(read.path, msg.path);
    assert_eq!(read.written, msg.written);
    assert!(read.attributes.type_echo());
    assert!(read.attributes.local());
    // Caller kludges survive alongside the synthesized TID.
    assert!(read.kludges.iter().any(|k| k == "TZUTC: 0000"));
    assert!(read.kludges.iter().any(|k| k == "CHRS: CP437 2"));
    assert!(read.kludges.iter().any(|k| k.starts_with("TID: ")));
    // Tearline and origin were appended to the text.
    assert!(read.text.starts_with("Hello World!\r"));
    assert!(read.text.contains("\r--- "));
    assert!(read.text.contains(" * Origin: Test BBS (1:103/705)"));

    // Echomail written locally awaits export.
    let header = base.read_message_header(1).unwrap();
    assert_eq!(header.date_processed, 0);
    assert_eq!(header.message_number, 1);
}

#[test]
fn local_messages_are_stamped_processed() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    base.write_message(&echo_message("local")).unwrap();

    let header = base.read_message_header(1).unwrap();
    assert_ne!(header.date_processed, 0);
    assert!(header.attributes.type_local());
    let read = base.read_message(1).unwrap();
    // No tearline without an echo context.
    assert_eq!(read.text, "Hello World!");
}

#[test]
fn netmail_carries_destination() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    let msg = Message {
        dest_addr: "1:104/56".parse().ok(),
        to: "SysOp".into(),
        ..echo_message("private")
    };
    base.write_message_ext(&msg, MessageKind::Netmail, "", "", "")
        .unwrap();

    let read = base.read_message(1).unwrap();
    assert_eq!(read.dest_addr, msg.dest_addr);
    assert!(read.attributes.type_net());
    assert!(read.attributes.local());
    assert!(!read.attributes.type_echo());
}

#[test]
fn active_msgs_tracks_deletions() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    for i in 0..5 {
        base.write_message(&echo_message(&format!("m{i}"))).unwrap();
    }
    assert_eq!(base.active_messages().unwrap(), 5);

    base.delete_message(2).unwrap();
    base.delete_message(4).unwrap();
    // Deleting twice is a no-op.
    base.delete_message(4).unwrap();

    assert_eq!(base.count().unwrap(), 5);
    assert_eq!(base.active_messages().unwrap(), 3);

    let header = base.read_message_header(2).unwrap();
    assert!(header.is_deleted());
    assert_eq!(header.text_len, 0);

    let visible: Vec<u32> = base
        .scan_messages(1, 0)
        .unwrap()
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(visible, vec![1, 3, 5]);
}

#[test]
fn mod_counter_strictly_increases() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    let before = base.stats().unwrap().mod_counter;
    base.write_message(&echo_message("a")).unwrap();
    let after_write = base.stats().unwrap().mod_counter;
    assert!(after_write > before);

    base.delete_message(1).unwrap();
    assert!(base.stats().unwrap().mod_counter > after_write);
}

#[test]
fn pack_removes_deleted_messages() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    for i in 1..=10 {
        base.write_message(&echo_message(&format!("msg {i}"))).unwrap();
    }
    for n in [3, 5, 7] {
        base.delete_message(n).unwrap();
    }

    let size_before: u64 = ["jhr", "jdt", "jdx"]
        .iter()
        .map(|ext| {
            fs::metadata(dir.path().join(format!("msgbases/general/area.{ext}")))
                .unwrap()
                .len()
        })
        .sum();

    let stats = base.pack().unwrap();
    assert_eq!(stats.before, 10);
    assert_eq!(stats.after, 7);
    assert_eq!(stats.removed, 3);

    let size_after: u64 = ["jhr", "jdt", "jdx"]
        .iter()
        .map(|ext| {
            fs::metadata(dir.path().join(format!("msgbases/general/area.{ext}")))
                .unwrap()
                .len()
        })
        .sum();
    assert!(size_after < size_before);

    // Message 4 now holds what used to be message 6.
    assert_eq!(base.read_message(4).unwrap().subject, "msg 6");
    assert_eq!(base.count().unwrap(), 7);
    assert_eq!(base.active_messages().unwrap(), 7);
    assert_eq!(base.read_message_header(7).unwrap().message_number, 7);

    // Packing an already-compact base changes nothing.
    let again = base.pack().unwrap();
    assert_eq!(again.removed, 0);
    let size_repack: u64 = ["jhr", "jdt", "jdx"]
        .iter()
        .map(|ext| {
            fs::metadata(dir.path().join(format!("msgbases/general/area.{ext}")))
                .unwrap()
                .len()
        })
        .sum();
    assert_eq!(size_repack, size_after);
}

#[test]
fn lastread_tracking() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    for i in 0..3 {
        base.write_message(&echo_message(&format!("m{i}"))).unwrap();
    }

    // Unknown user starts at message 1.
    assert_eq!(base.get_next_unread("Alice").unwrap(), 1);

    base.mark_message_read("Alice", 1).unwrap();
    assert_eq!(base.get_next_unread("Alice").unwrap(), 2);

    base.mark_message_read("Alice", 3).unwrap();
    assert!(matches!(
        base.get_next_unread("Alice"),
        Err(JamError::NotFound)
    ));

    // Case-insensitive handle, updated in place.
    base.mark_message_read("ALICE", 2).unwrap();
    let record = base.get_last_read("alice").unwrap().unwrap();
    assert_eq!(record.last_read, 2);
    assert_eq!(record.high_read, 3);

    let jlr = dir.path().join("msgbases/general/area.jlr");
    assert_eq!(fs::metadata(&jlr).unwrap().len(), 16);
}

#[test]
fn empty_base_has_no_unread() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    assert!(matches!(
        base.get_next_unread("nobody"),
        Err(JamError::NotFound)
    ));
}

#[test]
fn hwm_is_monotonic_and_survives_pack() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    for i in 0..4 {
        base.write_message(&echo_message(&format!("m{i}"))).unwrap();
    }

    assert_eq!(base.hwm().unwrap(), 0);
    base.set_hwm(3).unwrap();
    assert_eq!(base.hwm().unwrap(), 3);

    // Attempting to move it backward is ignored.
    base.set_hwm(1).unwrap();
    assert_eq!(base.hwm().unwrap(), 3);

    base.delete_message(1).unwrap();
    base.pack().unwrap();
    assert_eq!(base.hwm().unwrap(), 3, "pack must not disturb the mark");

    // The mark shares the lastread table with real users.
    assert!(base.get_last_read(HWM_USER).unwrap().is_some());
}

#[test]
fn msgid_serial_is_seeded_and_increments() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    let first = base.get_next_msg_serial().unwrap();
    assert!(first > 0);
    let second = base.get_next_msg_serial().unwrap();
    assert_eq!(second, first + 1);

    // The counter persists across reopen.
    drop(base);
    let base = scratch_base(&dir);
    assert_eq!(base.get_next_msg_serial().unwrap(), first + 2);
}

#[test]
fn link_builds_reply_threads() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    let root = Message {
        msg_id: "1:103/705 aaaa0001".into(),
        ..echo_message("root")
    };
    let reply1 = Message {
        msg_id: "1:103/705 aaaa0002".into(),
        reply_id: "1:103/705 aaaa0001".into(),
        ..echo_message("first reply")
    };
    let reply2 = Message {
        msg_id: "1:103/705 aaaa0003".into(),
        reply_id: "1:103/705 aaaa0001".into(),
        ..echo_message("second reply")
    };
    for msg in [&root, &reply1, &reply2] {
        base.write_message_ext(msg, MessageKind::Echomail, "GENERAL", "", "")
            .unwrap();
    }

    let changed = base.link().unwrap();
    assert!(changed >= 2);

    let root_hdr = base.read_message_header(1).unwrap();
    assert_eq!(root_hdr.reply_to, 0);
    assert_eq!(root_hdr.reply_first, 2);

    let r1 = base.read_message_header(2).unwrap();
    assert_eq!(r1.reply_to, 1);
    assert_eq!(r1.reply_next, 3);

    let r2 = base.read_message_header(3).unwrap();
    assert_eq!(r2.reply_to, 1);
    assert_eq!(r2.reply_next, 0);

    // Linking again is a fixpoint.
    assert_eq!(base.link().unwrap(), 0);
}

#[test]
fn link_handles_reply_cycles() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);

    // Two messages replying to each other must not loop the pass.
    let a = Message {
        msg_id: "1:103/705 000000aa".into(),
        reply_id: "1:103/705 000000bb".into(),
        ..echo_message("a")
    };
    let b = Message {
        msg_id: "1:103/705 000000bb".into(),
        reply_id: "1:103/705 000000aa".into(),
        ..echo_message("b")
    };
    for msg in [&a, &b] {
        base.write_message_ext(msg, MessageKind::Echomail, "GENERAL", "", "")
            .unwrap();
    }

    base.link().unwrap();
    let ha = base.read_message_header(1).unwrap();
    let hb = base.read_message_header(2).unwrap();
    assert_eq!(ha.reply_to, 2);
    assert_eq!(hb.reply_to, 1);
    assert_eq!(ha.reply_first, 2);
    assert_eq!(hb.reply_first, 1);
}

#[test]
fn update_header_stamps_date_processed() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    base.write_message_ext(
        &echo_message("pending"),
        MessageKind::Echomail,
        "GENERAL",
        "",
        "",
    )
    .unwrap();

    let mut header = base.read_message_header(1).unwrap();
    assert_eq!(header.date_processed, 0);
    header.date_processed = 1_700_000_123;
    base.update_message_header(1, &header).unwrap();

    assert_eq!(
        base.read_message_header(1).unwrap().date_processed,
        1_700_000_123
    );
}

#[test]
fn out_of_range_reads_are_rejected() {
    let dir = TempDir::new().unwrap();
    let base = scratch_base(&dir);
    base.write_message(&echo_message("only")).unwrap();

    assert!(matches!(
        base.read_message(0),
        Err(JamError::InvalidMessage(0))
    ));
    assert!(matches!(
        base.read_message(2),
        Err(JamError::InvalidMessage(2))
    ));
}
