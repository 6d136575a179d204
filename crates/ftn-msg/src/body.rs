//! Echomail body structure: AREA line, kludges, visible text, SEEN-BY and
//! PATH control lines.
//!
//! FTN bodies use `\r` line endings; `\r\n` and bare `\n` input is
//! normalized before splitting. Kludge lines start with SOH (0x01), which is
//! stripped on parse and restored on format.

const SOH: char = '\u{01}';
const AREA_PREFIX: &str = "AREA:";
const SEEN_BY_PREFIX: &str = "SEEN-BY: ";
const PATH_PREFIX: &str = "PATH: ";

/// A message body split into its echomail constituents.
///
/// [`format_body`] reassembles the canonical order: AREA, kludges, text,
/// SEEN-BY, PATH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    /// Conference tag from the `AREA:` line, when present.
    pub area: Option<String>,
    /// Kludge lines in source order, SOH stripped, PATH diverted.
    pub kludges: Vec<String>,
    /// Visible text, `\r`-separated, without a trailing `\r`.
    pub text: String,
    /// `SEEN-BY: ` lines, prefix stripped.
    pub seen_by: Vec<String>,
    /// `\x01PATH: ` lines, prefix stripped.
    pub path: Vec<String>,
}

impl ParsedBody {
    /// First kludge with the given tag (e.g. `"MSGID:"`), payload trimmed.
    pub fn kludge(&self, tag: &str) -> Option<&str> {
        self.kludges
            .iter()
            .find(|k| k.starts_with(tag))
            .map(|k| k[tag.len()..].trim())
    }
}

/// Splits a raw body into [`ParsedBody`] parts.
pub fn parse_body(body: &str) -> ParsedBody {
    let normalized = body.replace("\r\n", "\r").replace('\n', "\r");
    let mut lines: Vec<&str> = normalized.split('\r').collect();
    // A `\r`-terminated body yields one empty trailing segment; drop it so
    // it does not become a text line.
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut parsed = ParsedBody::default();
    let mut text_lines: Vec<&str> = Vec::new();
    let mut seen_first_content = false;

    for line in lines {
        if !seen_first_content && !line.is_empty() {
            seen_first_content = true;
            if let Some(area) = line.strip_prefix(AREA_PREFIX) {
                parsed.area = Some(area.trim().to_string());
                continue;
            }
        }
        if let Some(kludge) = line.strip_prefix(SOH) {
            if let Some(path) = kludge.strip_prefix(PATH_PREFIX) {
                parsed.path.push(path.to_string());
            } else {
                parsed.kludges.push(kludge.to_string());
            }
        } else if let Some(seen) = line.strip_prefix(SEEN_BY_PREFIX) {
            parsed.seen_by.push(seen.to_string());
        } else {
            text_lines.push(line);
        }
    }

    // Trailing blank lines carry nothing; interior ones are text.
    while text_lines.last() == Some(&"") {
        text_lines.pop();
    }
    parsed.text = text_lines.join("\r");
    parsed
}

/// Reassembles a body in canonical order with `\r` line endings.
pub fn format_body(body: &ParsedBody) -> String {
    let mut out = String::new();
    if let Some(area) = &body.area {
        out.push_str(AREA_PREFIX);
        out.push_str(area);
        out.push('\r');
    }
    for kludge in &body.kludges {
        out.push(SOH);
        out.push_str(kludge);
        out.push('\r');
    }
    if !body.text.is_empty() {
        out.push_str(&body.text);
        out.push('\r');
    }
    for seen in &body.seen_by {
        out.push_str(SEEN_BY_PREFIX);
        out.push_str(seen);
        out.push('\r');
    }
    for path in &body.path {
        out.push(SOH);
        out.push_str(PATH_PREFIX);
        out.push_str(path);
        out.push('\r');
    }
    out
}
