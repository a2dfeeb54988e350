use std::{ffi::OsString, path::PathBuf};

use chrono::Utc;
use notify::{event::ModifyKind, Event, EventKind};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;

use super::types::{ChangeKind, FileChange};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Collapse raw OS events for one file into debounced notifications.
///
/// The first relevant event opens a window of `debounce`; everything arriving
/// inside it is folded into one `FileChange`. Delivery uses `try_send` on a
/// bounded channel: when the consumer still has a notification queued, the new
/// one is merged into it rather than queued behind it.
pub async fn debounce_loop(
    target: PathBuf,
    debounce: Duration,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    changes: mpsc::Sender<FileChange>,
    errors: mpsc::UnboundedSender<String>,
    cancel_token: CancellationToken,
) {
    let Some(file_name) = target.file_name().map(|name| name.to_os_string()) else {
        let _ = errors.send(format!("cannot watch {}: path has no file name", target.display()));
        return;
    };

    loop {
        let first = tokio::select! {
            _ = cancel_token.cancelled() => break,
            raw = raw_rx.recv() => match raw {
                None => break,
                Some(Err(err)) => {
                    let _ = errors.send(format!("file watcher error: {err}"));
                    continue;
                }
                Some(Ok(event)) => match relevant_kind(&event, &file_name) {
                    Some(kind) => kind,
                    None => continue,
                },
            },
        };

        let mut kind = first;
        let mut coalesced = 1u32;
        let window = sleep(debounce);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                _ = cancel_token.cancelled() => {
                    log_info!("debounce loop shutting down for {}", target.display());
                    return;
                }
                raw = raw_rx.recv() => match raw {
                    None => break,
                    Some(Err(err)) => {
                        let _ = errors.send(format!("file watcher error: {err}"));
                    }
                    Some(Ok(event)) => {
                        if let Some(next) = relevant_kind(&event, &file_name) {
                            kind = dominant(kind, next);
                            coalesced = coalesced.saturating_add(1);
                        }
                    }
                },
            }
        }

        let change = FileChange {
            kind,
            path: target.clone(),
            timestamp: Utc::now(),
            coalesced,
        };

        match changes.try_send(change) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("change notification already pending for {}", target.display());
            }
            Err(TrySendError::Closed(_)) => {
                log_warn!("change consumer dropped; stopping watcher for {}", target.display());
                break;
            }
        }
    }

    log_info!("debounce loop exited for {}", target.display());
}

/// Map a raw event to a change kind if it touches the watched file.
pub(crate) fn relevant_kind(event: &Event, file_name: &OsString) -> Option<ChangeKind> {
    let touches_target = event
        .paths
        .iter()
        .any(|path| path.file_name().map(|name| name == file_name.as_os_str()).unwrap_or(false));
    if !touches_target {
        return None;
    }

    match event.kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Structural changes outrank plain modifications within one window.
fn dominant(current: ChangeKind, next: ChangeKind) -> ChangeKind {
    fn rank(kind: ChangeKind) -> u8 {
        match kind {
            ChangeKind::Modified => 0,
            ChangeKind::Created => 1,
            ChangeKind::Renamed => 2,
            ChangeKind::Removed => 3,
        }
    }
    if rank(next) >= rank(current) {
        next
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn ignores_other_files() {
        let name = OsString::from("console.log");
        let ev = event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), "/logs/other.log");
        assert_eq!(relevant_kind(&ev, &name), None);
    }

    #[test]
    fn maps_event_kinds() {
        let name = OsString::from("console.log");
        let path = "/logs/console.log";
        assert_eq!(
            relevant_kind(&event(EventKind::Create(CreateKind::File), path), &name),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            relevant_kind(&event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), path), &name),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            relevant_kind(&event(EventKind::Remove(RemoveKind::File), path), &name),
            Some(ChangeKind::Removed)
        );
    }

    #[tokio::test]
    async fn burst_collapses_into_one_notification() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (changes_tx, mut changes_rx) = mpsc::channel(1);
        let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(debounce_loop(
            PathBuf::from("/logs/console.log"),
            Duration::from_millis(50),
            raw_rx,
            changes_tx,
            errors_tx,
            cancel.clone(),
        ));

        for _ in 0..10 {
            raw_tx
                .send(Ok(event(
                    EventKind::Modify(ModifyKind::Data(DataChange::Any)),
                    "/logs/console.log",
                )))
                .unwrap();
        }

        let change = tokio::time::timeout(Duration::from_secs(2), changes_rx.recv())
            .await
            .expect("debounced change")
            .expect("channel open");
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.coalesced, 10);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(changes_rx.try_recv().is_err());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn watcher_errors_are_forwarded() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (changes_tx, _changes_rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(debounce_loop(
            PathBuf::from("/logs/console.log"),
            Duration::from_millis(10),
            raw_rx,
            changes_tx,
            errors_tx,
            cancel.clone(),
        ));

        raw_tx.send(Err(notify::Error::generic("boom"))).unwrap();
        let message = errors_rx.recv().await.unwrap();
        assert!(message.contains("boom"));

        cancel.cancel();
        worker.await.unwrap();
    }
}
