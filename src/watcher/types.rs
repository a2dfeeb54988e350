use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
        }
    }
}

/// One debounced notification for the watched file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// Raw OS events folded into this notification.
    pub coalesced: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("directory {} does not exist", .0.display())]
    ParentNotFound(PathBuf),

    #[error("file watcher already active")]
    AlreadyWatching,
}
