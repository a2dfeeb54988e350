use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EntryType {
    Unknown,
    DumpingStacks,
    DumpingStack,
    Warning,
    Error,
    Info,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Unknown => "Unknown",
            EntryType::DumpingStacks => "DumpingStacks",
            EntryType::DumpingStack => "DumpingStack",
            EntryType::Warning => "Warning",
            EntryType::Error => "Error",
            EntryType::Info => "Info",
        }
    }
}

impl Default for EntryType {
    fn default() -> Self {
        EntryType::Unknown
    }
}

/// One classified log line. Built by the classifier and dropped after aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Parsed from the leading `[MM/DD/YYYY - HH:MM:SSAM]` bracket; the log carries no zone.
    pub timestamp: Option<NaiveDateTime>,
    pub content: String,
    pub entry_type: EntryType,
    pub line_number: Option<u64>,
}
