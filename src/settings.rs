use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::watch;

use crate::monitor::MonitorConfig;
use crate::trend::DEFAULT_MOVING_AVERAGE_PERIOD;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub monitor: MonitorConfig,
    pub auto_start: bool,
    pub trend_period: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            auto_start: true,
            trend_period: DEFAULT_MOVING_AVERAGE_PERIOD,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
    changes: watch::Sender<AppSettings>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing or unreadable-as-JSON file yields
    /// defaults; the file is only written on the first update.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            parse_or_default(&contents, &path)
        } else {
            AppSettings::default()
        };

        let (changes, _) = watch::channel(data.clone());
        Ok(Self {
            path,
            data: RwLock::new(data),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> AppSettings {
        self.read().clone()
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        self.read().monitor.clone()
    }

    pub fn update_monitor_config(&self, config: MonitorConfig) -> Result<()> {
        self.update(|settings| settings.monitor = config)
    }

    pub fn update(&self, apply: impl FnOnce(&mut AppSettings)) -> Result<()> {
        let snapshot = {
            let mut guard = self.write();
            let mut next = guard.clone();
            apply(&mut next);
            self.persist(&next)?;
            *guard = next.clone();
            next
        };
        self.changes.send_replace(snapshot);
        Ok(())
    }

    /// Change stream; the receiver starts at the current settings.
    pub fn subscribe(&self) -> watch::Receiver<AppSettings> {
        self.changes.subscribe()
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", self.path.display()))?;
        {
            let mut guard = self.write();
            *guard = data.clone();
        }
        self.changes.send_replace(data);
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, AppSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_or_default(contents: &str, path: &Path) -> AppSettings {
    match serde_json::from_str(contents) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(
                "Ignoring unreadable settings in {} ({}); using defaults",
                path.display(),
                err
            );
            AppSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        assert_eq!(store.settings(), AppSettings::default());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "monitor": { "pollIntervalMs": 250 }, "autoStart": false }"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.settings();
        assert!(!settings.auto_start);
        assert_eq!(settings.monitor.poll_interval_ms, 250);
        assert_eq!(settings.monitor.max_retained_entries, 10_000);
        assert_eq!(settings.trend_period, DEFAULT_MOVING_AVERAGE_PERIOD);
    }

    #[test]
    fn update_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        let mut changes = store.subscribe();

        let config = MonitorConfig::with_log_file("/var/log/game/script.log");
        store.update_monitor_config(config.clone()).unwrap();

        assert!(changes.has_changed().unwrap());
        assert_eq!(changes.borrow_and_update().monitor, config);

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.monitor_config(), config);
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store.update(|s| s.trend_period = 3).unwrap();

        let mut edited = store.settings();
        edited.trend_period = 9;
        fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();

        store.reload().unwrap();
        assert_eq!(store.settings().trend_period, 9);
    }

    #[test]
    fn reload_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        fs::write(&path, "[]").unwrap();

        assert!(store.reload().is_err());
        assert_eq!(store.settings(), AppSettings::default());
    }
}
