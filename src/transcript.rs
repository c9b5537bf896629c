//! The line-oriented transcript format shared by the exporter, the merger and
//! the HTML view.
//!
//! ```text
//! [2024-01-05 10:00] Alice: first line of the body
//! continuation lines, verbatim
//! [2024-01-05 10:02] Me: next message
//! ```
//!
//! A line starting with a bracketed `YYYY-MM-DD HH:MM` stamp followed by a
//! sender token ending in `:` opens a record; every other line belongs to the
//! most recently opened record. Parsing a rendered transcript gives back the
//! exact text that was written, so the merger can compare records verbatim.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ExportError, Result};

/// Timestamp layout of record headers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Markdown hard-break marker appended to every body.
pub const HARD_BREAK: &str = "  ";

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\[\d{4}-\d{2}-\d{2},?\s\d{2}:\d{2}\])(.*?:)").expect("header regex is valid")
});

/// One message recovered from a transcript.
///
/// The three fields hold the raw text as written: `header` is the bracketed
/// stamp, `sender` runs up to and including the first colon, and `body` is
/// everything after it, newlines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: String,
    pub sender: String,
    pub body: String,
}

impl Record {
    /// The record exactly as it appeared in the transcript.
    pub fn flatten(&self) -> String {
        let mut s = String::with_capacity(self.header.len() + self.sender.len() + self.body.len());
        s.push_str(&self.header);
        s.push_str(&self.sender);
        s.push_str(&self.body);
        s
    }

    /// Stamp without brackets, e.g. `2024-01-05 10:00`.
    pub fn timestamp(&self) -> &str {
        self.header
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    /// Date and time halves of the stamp.
    pub fn date_time(&self) -> (String, String) {
        let stamp = self.timestamp().replace(',', "");
        match stamp.split_once(char::is_whitespace) {
            Some((date, time)) => (date.to_string(), time.trim().to_string()),
            None => (stamp, String::new()),
        }
    }

    /// Sender with the separating whitespace and trailing colon removed.
    pub fn sender_name(&self) -> &str {
        let s = self.sender.trim_start();
        s.strip_suffix(':').unwrap_or(s)
    }

    /// Body as typed: leading separator, final newline and hard-break
    /// marker removed.
    pub fn text(&self) -> &str {
        let s = self.body.strip_prefix(' ').unwrap_or(&self.body);
        let s = s.strip_suffix('\n').unwrap_or(s);
        s.strip_suffix(HARD_BREAK).unwrap_or(s)
    }
}

/// Format one record. `body` is written verbatim and should already carry
/// its hard-break marker.
pub fn format_record(timestamp: &str, sender: &str, body: &str) -> String {
    format!("[{}] {}: {}\n", timestamp, sender, body)
}

/// Parse a whole transcript.
pub fn parse(text: &str) -> Result<Vec<Record>> {
    parse_lines(text.split_inclusive('\n'))
}

/// Group lines (each keeping its trailing newline) into records.
///
/// The first line must be a header; an empty input yields no records.
pub fn parse_lines<'a, I>(lines: I) -> Result<Vec<Record>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut records: Vec<Record> = Vec::new();
    for line in lines {
        if let Some(caps) = HEADER.captures(line) {
            let (Some(header), Some(sender)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            records.push(Record {
                header: header.as_str().to_string(),
                sender: sender.as_str().to_string(),
                body: line[sender.end()..].to_string(),
            });
        } else {
            match records.last_mut() {
                Some(last) => last.body.push_str(line),
                None => {
                    return Err(ExportError::StructuralParse {
                        line: line.to_string(),
                    });
                }
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_header_sender_and_body() {
        let recs = parse("[2024-01-05 10:00] Alice: hello  \n").unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].header, "[2024-01-05 10:00]");
        assert_eq!(recs[0].sender, " Alice:");
        assert_eq!(recs[0].body, " hello  \n");
        assert_eq!(recs[0].timestamp(), "2024-01-05 10:00");
        assert_eq!(recs[0].sender_name(), "Alice");
        assert_eq!(recs[0].text(), "hello");
    }

    #[test]
    fn continuation_lines_join_previous_record() {
        let t = "[2024-01-05 10:00] Alice: one\ntwo\n\nthree  \n[2024-01-05 10:01] Me: ok  \n";
        let recs = parse(t).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].text(), "one\ntwo\n\nthree");
        assert_eq!(recs[1].sender_name(), "Me");
    }

    #[test]
    fn flatten_reproduces_input() {
        let t = "[2024-01-05 10:00] Alice: one\ntwo  \n[2024-01-06 09:00] Bob: hi  \n";
        let recs = parse(t).unwrap();
        let joined: String = recs.iter().map(Record::flatten).collect();
        assert_eq!(joined, t);
    }

    #[test]
    fn sender_without_space_and_comma_stamp() {
        let recs = parse("[2024-01-05, 10:00]Alice: hello\n").unwrap();
        assert_eq!(recs[0].sender, "Alice:");
        assert_eq!(recs[0].date_time(), ("2024-01-05".into(), "10:00".into()));
    }

    #[test]
    fn sender_stops_at_first_colon() {
        let recs = parse("[2024-01-05 10:00] Bob: see: this\n").unwrap();
        assert_eq!(recs[0].sender_name(), "Bob");
        assert_eq!(recs[0].body, " see: this\n");
    }

    #[test]
    fn missing_trailing_newline_is_tolerated() {
        let recs = parse("[2024-01-05 10:00] Bob: last").unwrap();
        assert_eq!(recs[0].text(), "last");
    }

    #[test]
    fn leading_non_header_is_a_structural_error() {
        let err = parse("stray\n[2024-01-05 10:00] Bob: hi\n").unwrap_err();
        assert!(matches!(err, ExportError::StructuralParse { .. }));
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn header_detection() {
        assert!(HEADER.is_match("[2024-01-05 10:00] A: x"));
        assert!(!HEADER.is_match("[2024-1-05 10:00] A: x"));
        assert!(!HEADER.is_match(" [2024-01-05 10:00] A: x"));
        assert!(!HEADER.is_match("[2024-01-05 10:00] no colon"));
    }

    #[test]
    fn format_then_parse() {
        let line = format_record("2024-01-05 10:00", "Alice", "multi\nline  ");
        let recs = parse(&line).unwrap();
        assert_eq!(recs[0].timestamp(), "2024-01-05 10:00");
        assert_eq!(recs[0].sender_name(), "Alice");
        assert_eq!(recs[0].text(), "multi\nline");
    }
}
