use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    Stopped,
    Starting,
    Monitoring,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        MonitorStatus::Stopped
    }
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Stopped => "stopped",
            MonitorStatus::Starting => "starting",
            MonitorStatus::Monitoring => "monitoring",
        }
    }
}

/// Where incremental cycles come from while monitoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSource {
    /// No watcher or ticker is alive.
    #[default]
    Idle,
    Watcher,
    Polling,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Idle => "idle",
            TriggerSource::Watcher => "watcher",
            TriggerSource::Polling => "polling",
        }
    }
}

/// What woke the worker for an incremental cycle.
#[derive(Debug, Clone)]
pub(crate) enum Trigger {
    Change(crate::watcher::FileChange),
    Poll,
}

impl Trigger {
    pub(crate) fn describe(&self) -> String {
        match self {
            Trigger::Change(change) => format!(
                "{} ({} events)",
                change.kind.as_str(),
                change.coalesced
            ),
            Trigger::Poll => "poll".to_string(),
        }
    }
}
