use chrono::NaiveDateTime;

use crate::models::{EntryType, LogEntry};

pub const DUMPING_STACKS_MARKER: &str = "Dumping Stacks";
pub const DUMPING_STACK_MARKER: &str = "Dumping Stack ";
pub const WARNING_MARKER: &str = " warning: ";
pub const ERROR_MARKER: &str = " error: ";

/// chrono format for the bracket body, e.g. `07/29/2025 - 01:00:00PM`.
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %I:%M:%S%p";

/// Marker table in priority order. The first hit wins.
const MARKERS: [(&str, EntryType); 4] = [
    (DUMPING_STACKS_MARKER, EntryType::DumpingStacks),
    (DUMPING_STACK_MARKER, EntryType::DumpingStack),
    (WARNING_MARKER, EntryType::Warning),
    (ERROR_MARKER, EntryType::Error),
];

/// Classify a single raw line. Never fails: anything unrecognisable becomes `Unknown`.
pub fn classify(line: &str, line_number: Option<u64>) -> LogEntry {
    let (timestamp, rest) = match split_timestamp(line) {
        Some((ts, rest)) => (Some(ts), rest),
        None => (None, line),
    };

    let entry_type = MARKERS
        .iter()
        .find(|(marker, _)| line.contains(marker))
        .map(|(_, kind)| *kind)
        .unwrap_or(if timestamp.is_some() {
            EntryType::Info
        } else {
            EntryType::Unknown
        });

    LogEntry {
        timestamp,
        content: rest.trim().to_string(),
        entry_type,
        line_number,
    }
}

/// Classify a batch, numbering lines from 1 in input order.
pub fn classify_all<I, S>(lines: I) -> Vec<LogEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| classify(line.as_ref(), Some(idx as u64 + 1)))
        .collect()
}

/// Splits `[MM/DD/YYYY - HH:MM:SSAM] rest` into its timestamp and the remaining text.
fn split_timestamp(line: &str) -> Option<(NaiveDateTime, &str)> {
    let body = line.strip_prefix('[')?;
    let close = body.find(']')?;
    let stamp = body[..close].trim();
    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((parsed, &body[close + 1..]))
}
