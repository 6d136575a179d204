//! The public view of one stored message.

use time::OffsetDateTime;

use ftn_msg::FtnAddress;

use crate::records::MessageAttributes;

/// What kind of message is being stored; decides which subfields and
/// surrounding text lines the write path adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Local,
    Echomail,
    Netmail,
}

/// One message as applications see it, assembled from a header, its
/// subfields and the text file.
///
/// `seen_by` and `path` are the space-joined single strings stored in the
/// dedicated JAM subfields, not per-node lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// When the message was written, UTC.
    pub written: OffsetDateTime,
    /// Body text with `\r` line endings, CP437 bytes widened 1:1.
    pub text: String,
    pub orig_addr: Option<FtnAddress>,
    pub dest_addr: Option<FtnAddress>,
    pub msg_id: String,
    pub reply_id: String,
    pub pid: String,
    pub flags: String,
    pub seen_by: String,
    pub path: String,
    /// FTN kludge lines in source order, SOH stripped.
    pub kludges: Vec<String>,
    pub attributes: MessageAttributes,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            written: OffsetDateTime::UNIX_EPOCH,
            text: String::new(),
            orig_addr: None,
            dest_addr: None,
            msg_id: String::new(),
            reply_id: String::new(),
            pid: String::new(),
            flags: String::new(),
            seen_by: String::new(),
            path: String::new(),
            kludges: Vec::new(),
            attributes: MessageAttributes::new(),
        }
    }
}

impl Message {
    /// The stored attribute word, defaulting to `Local | TypeLocal` when the
    /// caller left it empty.
    pub fn attribute_or_default(&self) -> MessageAttributes {
        if self.attributes.bits() == 0 {
            MessageAttributes::new().with_local(true).with_type_local(true)
        } else {
            self.attributes
        }
    }
}

/// Recovers an FTN address from the last ` * Origin:` line of a message
/// body, for echomail that arrived without an origin-address subfield.
pub fn origin_address_from_text(text: &str) -> Option<FtnAddress> {
    let line = text
        .split('\r')
        .filter(|l| l.trim_start().starts_with("* Origin:"))
        .next_back()?;
    let open = line.rfind('(')?;
    let close = line[open..].find(')')? + open;
    line[open + 1..close].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attribute_is_local() {
        let msg = Message::default();
        let attrs = msg.attribute_or_default();
        assert!(attrs.local() && attrs.type_local());
    }

    #[test]
    fn explicit_attribute_is_kept() {
        let msg = Message {
            attributes: MessageAttributes::new().with_private(true),
            ..Default::default()
        };
        assert!(msg.attribute_or_default().private());
        assert!(!msg.attribute_or_default().type_local());
    }

    #[test]
    fn origin_line_recovery() {
        let text = "Hello\r--- hub-rs\r * Origin: Test BBS (1:103/705)\r";
        assert_eq!(
            origin_address_from_text(text),
            Some(FtnAddress::new(1, 103, 705))
        );
    }

    #[test]
    fn origin_line_last_occurrence_wins() {
        let text = " * Origin: One (1:1/1)\r * Origin: Two (2:2/2.3)";
        assert_eq!(
            origin_address_from_text(text),
            "2:2/2.3".parse().ok()
        );
    }

    #[test]
    fn origin_line_absent_or_malformed() {
        assert_eq!(origin_address_from_text("no origin here"), None);
        assert_eq!(origin_address_from_text(" * Origin: broken (not-an-addr)"), None);
    }
}
