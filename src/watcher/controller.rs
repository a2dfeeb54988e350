use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use super::loop_worker::debounce_loop;
use super::types::{FileChange, WatcherError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Owns the OS watcher for one file and the task that debounces its events.
pub struct ChangeNotifier {
    watcher: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    debounce: Duration,
}

impl ChangeNotifier {
    pub fn new(debounce: Duration) -> Self {
        Self {
            watcher: None,
            handle: None,
            cancel_token: None,
            debounce,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.handle.is_some()
    }

    /// Start watching `path`.
    ///
    /// The parent directory is watched (non-recursively) so creation and
    /// rotation of the file are seen as well. Debounced changes go to
    /// `changes`; failures reported by the OS watcher after registration go to
    /// `errors`. Must be called from within a tokio runtime.
    pub fn start_watching(
        &mut self,
        path: &Path,
        changes: mpsc::Sender<FileChange>,
        errors: mpsc::UnboundedSender<String>,
    ) -> Result<(), WatcherError> {
        if self.handle.is_some() {
            return Err(WatcherError::AlreadyWatching);
        }

        let target = absolute(path);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !parent.is_dir() {
            return Err(WatcherError::ParentNotFound(parent));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(debounce_loop(
            target.clone(),
            self.debounce,
            raw_rx,
            changes,
            errors,
            cancel_token.clone(),
        ));

        info!("Watching {} for changes (debounce {:?})", target.display(), self.debounce);

        self.watcher = Some(watcher);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop_watching(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        // Dropping the OS watcher closes the raw channel as well.
        self.watcher.take();

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("debounce loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
