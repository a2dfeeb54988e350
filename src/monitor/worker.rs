use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    classifier::aggregate_lines,
    models::{HealthLevel, Statistics},
    tail::{read_full, FullRead, TailBatch, TailReader},
    watcher::{ChangeNotifier, FileChange, DEFAULT_DEBOUNCE},
};

use super::{MonitorConfig, MonitorError, MonitorStatus, Trigger, TriggerSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub(crate) enum MonitorCommand {
    Start {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<(), MonitorError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    UpdateConfig {
        config: MonitorConfig,
        reply: oneshot::Sender<()>,
    },
    ForceUpdate {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<Option<Statistics>, MonitorError>>,
    },
    Shutdown,
}

/// Outbound channels shared between the worker and every controller handle.
pub(crate) struct Outlets {
    pub stats_tx: broadcast::Sender<Statistics>,
    pub errors_tx: broadcast::Sender<String>,
    pub last_tx: watch::Sender<Option<Statistics>>,
    pub status_tx: watch::Sender<MonitorStatus>,
    pub source_tx: watch::Sender<TriggerSource>,
    pub config_tx: watch::Sender<MonitorConfig>,
}

/// Single owner of the tail cursor, the last published snapshot and the
/// trigger sources. Every cycle runs on this task, one at a time.
pub(crate) struct MonitorWorker {
    config: MonitorConfig,
    status: MonitorStatus,
    session_id: Option<Uuid>,
    tail: Option<TailReader>,
    notifier: ChangeNotifier,
    ticker: Option<JoinHandle<()>>,
    last: Option<Statistics>,
    last_health: HealthLevel,
    /// Token of the current monitoring session; `stop()` on a handle cancels it
    /// before queueing the stop command so an in-flight cycle is abandoned.
    session: Arc<Mutex<CancellationToken>>,
    outlets: Outlets,
    change_tx: mpsc::Sender<FileChange>,
    change_rx: mpsc::Receiver<FileChange>,
    poll_tx: mpsc::Sender<()>,
    poll_rx: mpsc::Receiver<()>,
    watch_err_tx: mpsc::UnboundedSender<String>,
    watch_err_rx: mpsc::UnboundedReceiver<String>,
}

impl MonitorWorker {
    pub(crate) fn new(
        config: MonitorConfig,
        session: Arc<Mutex<CancellationToken>>,
        outlets: Outlets,
    ) -> Self {
        // Capacity 1: at most one trigger waits while a cycle runs.
        let (change_tx, change_rx) = mpsc::channel(1);
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let (watch_err_tx, watch_err_rx) = mpsc::unbounded_channel();

        Self {
            config,
            status: MonitorStatus::Stopped,
            session_id: None,
            tail: None,
            notifier: ChangeNotifier::new(DEFAULT_DEBOUNCE),
            ticker: None,
            last: None,
            last_health: HealthLevel::Normal,
            session,
            outlets,
            change_tx,
            change_rx,
            poll_tx,
            poll_rx,
            watch_err_tx,
            watch_err_rx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<MonitorCommand>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    None | Some(MonitorCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(message) = self.watch_err_rx.recv() => self.report(message),
                Some(change) = self.change_rx.recv() => {
                    self.run_incremental_cycle(Trigger::Change(change)).await
                }
                Some(()) = self.poll_rx.recv() => self.run_incremental_cycle(Trigger::Poll).await,
            }
        }

        self.stop().await;
        log_info!("monitor worker exited");
    }

    async fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Start { cancel, reply } => {
                let result = self.start(cancel).await;
                let _ = reply.send(result);
            }
            MonitorCommand::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            MonitorCommand::UpdateConfig { config, reply } => {
                self.update_configuration(config).await;
                let _ = reply.send(());
            }
            MonitorCommand::ForceUpdate { cancel, reply } => {
                let result = self.force_update(cancel).await;
                let _ = reply.send(result);
            }
            MonitorCommand::Shutdown => {}
        }
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), MonitorError> {
        if self.status == MonitorStatus::Monitoring {
            debug!("start ignored: already monitoring");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        let violations = self.config.validate();
        if !violations.is_empty() {
            self.report(format!(
                "Invalid monitoring configuration: {}",
                violations.join("; ")
            ));
            return Ok(());
        }
        if self.config.log_file_path.as_os_str().is_empty() {
            self.report("Cannot start monitoring: log file path is not configured".to_string());
            return Ok(());
        }

        self.set_status(MonitorStatus::Starting);
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.replace_session_token();

        let path = self.config.log_file_path.clone();
        let options = self.config.encoding_options();
        let init_path = path.clone();
        let tail = match tokio::task::spawn_blocking(move || {
            TailReader::initialize(init_path, false, options)
        })
        .await
        {
            Ok(Ok(reader)) => reader,
            Ok(Err(err)) => {
                self.report(format!("Failed to open log file: {err:#}"));
                TailReader::detached(path.clone(), options)
            }
            Err(err) => {
                self.report(format!("Tail reader initialisation panicked: {err}"));
                TailReader::detached(path.clone(), options)
            }
        };
        self.tail = Some(tail);

        if self.config.use_change_notifier {
            if let Err(err) = self.notifier.start_watching(
                &path,
                self.change_tx.clone(),
                self.watch_err_tx.clone(),
            ) {
                self.report(format!(
                    "File watcher unavailable ({err}); polling every {} ms instead",
                    self.config.poll_interval_ms
                ));
                self.spawn_ticker().await;
            } else {
                self.outlets.source_tx.send_replace(TriggerSource::Watcher);
            }
        } else {
            self.spawn_ticker().await;
        }

        self.set_status(MonitorStatus::Monitoring);
        log_info!(
            "monitoring session {} started for {} ({})",
            session_id,
            path.display(),
            self.outlets.source_tx.borrow().as_str()
        );

        if let Err(MonitorError::Cancelled) = self.force_update(cancel).await {
            log_warn!("start of session {} cancelled during initial update", session_id);
            self.stop().await;
            return Err(MonitorError::Cancelled);
        }

        Ok(())
    }

    async fn stop(&mut self) {
        if self.status == MonitorStatus::Stopped {
            // A handle may have cancelled the idle token on its way here.
            if self.current_session_token().is_cancelled() {
                self.replace_session_token();
            }
            return;
        }

        self.current_session_token().cancel();

        if let Err(err) = self.notifier.stop_watching().await {
            log_error!("failed to stop file watcher: {err:#}");
        }
        self.cancel_ticker().await;
        self.outlets.source_tx.send_replace(TriggerSource::Idle);
        self.tail = None;

        // Triggers queued for the old session must not leak into the next one.
        while self.change_rx.try_recv().is_ok() {}
        while self.poll_rx.try_recv().is_ok() {}

        self.replace_session_token();
        self.set_status(MonitorStatus::Stopped);
        if let Some(session_id) = self.session_id.take() {
            log_info!("monitoring session {} stopped", session_id);
        }
    }

    async fn update_configuration(&mut self, config: MonitorConfig) {
        let restart = self.status == MonitorStatus::Monitoring;
        if restart {
            self.stop().await;
        }

        self.config = config.clone();
        self.outlets.config_tx.send_replace(config);
        info!("monitoring configuration updated");

        if restart {
            let _ = self.start(CancellationToken::new()).await;
        }
    }

    /// Re-parse the whole file and publish the totals if they changed.
    ///
    /// Nothing is committed until the read completes, so a cancelled update
    /// leaves the cursor and the last snapshot as they were.
    async fn force_update(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<Option<Statistics>, MonitorError> {
        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }
        if self.config.log_file_path.as_os_str().is_empty() {
            self.report("Cannot refresh statistics: log file path is not configured".to_string());
            return Ok(None);
        }

        let path = self.config.log_file_path.clone();
        let (options, known) = match &self.tail {
            Some(tail) => (tail.options(), tail.resolved_encoding()),
            None => (self.config.encoding_options(), None),
        };
        let session = self.current_session_token();

        let work = tokio::task::spawn_blocking(move || read_full(&path, options, known));
        let outcome = tokio::select! {
            outcome = work => outcome,
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            _ = session.cancelled() => return Err(MonitorError::Cancelled),
        };

        let full: FullRead = match outcome {
            Ok(Ok(full)) => full,
            Ok(Err(err)) => {
                self.report(format!("Full refresh failed: {err:#}"));
                return Ok(None);
            }
            Err(err) => {
                self.report(format!("Full refresh task failed: {err}"));
                return Ok(None);
            }
        };

        let stats = aggregate_lines(&full.lines);
        if let Some(tail) = self.tail.as_mut() {
            tail.adopt_encoding(full.encoding);
            // An unfinished last line stays ahead of the cursor for the tail to complete.
            tail.sync_to(full.consumed);
        }

        debug!(
            "full refresh parsed {} lines ({} bytes, {})",
            full.lines.len(),
            full.length,
            full.encoding.as_str()
        );
        self.publish(stats.clone());
        Ok(Some(stats))
    }

    async fn run_incremental_cycle(&mut self, trigger: Trigger) {
        if self.status != MonitorStatus::Monitoring {
            debug!("ignoring stale {} trigger", trigger.describe());
            return;
        }
        let Some(mut tail) = self.tail.take() else {
            return;
        };

        debug!("incremental cycle triggered by {}", trigger.describe());
        let session = self.current_session_token();

        let work = tokio::task::spawn_blocking(move || {
            let result = read_increment(&mut tail);
            let backlog = tail.has_new_content();
            (tail, result, backlog)
        });

        let outcome = tokio::select! {
            outcome = work => outcome,
            _ = session.cancelled() => {
                debug!("incremental cycle abandoned: session cancelled");
                return;
            }
        };

        let (tail, result, backlog) = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                self.report(format!("Incremental read task failed: {err}"));
                self.reopen_tail_at_end().await;
                return;
            }
        };
        self.tail = Some(tail);

        match result {
            Ok(None) => {}
            Ok(Some(batch)) => {
                let delta = aggregate_lines(&batch.lines);
                let now = Utc::now();
                let next = match &self.last {
                    Some(last) if !batch.rewound => last.merged_with(&delta, now),
                    _ => {
                        if batch.rewound {
                            log_warn!("log file was truncated or recreated; rebasing totals");
                        }
                        Statistics::new(now, delta.dumps, delta.stacks, delta.warnings, delta.errors)
                    }
                };
                self.publish(next);
            }
            Err(err) => self.report(format!("Failed to read new log content: {err:#}")),
        }

        if backlog {
            let _ = self.poll_tx.try_send(());
        }
    }

    /// Publish `snapshot` unless its counters equal the last published ones.
    fn publish(&mut self, snapshot: Statistics) -> bool {
        if let Some(last) = &self.last {
            if last.same_counts(&snapshot) {
                debug!("statistics unchanged; not publishing");
                return false;
            }
        }

        let health = snapshot.health(
            self.config.warning_ratio_threshold,
            self.config.error_ratio_threshold,
        );
        if health != self.last_health {
            match health {
                HealthLevel::Normal => info!("dump ratio back to normal ({:.3})", snapshot.ratio),
                level => warn!("dump ratio {:.3} reached {} level", snapshot.ratio, level.as_str()),
            }
            self.last_health = health;
        }

        self.last = Some(snapshot.clone());
        self.outlets.last_tx.send_replace(Some(snapshot.clone()));
        // No subscribers is not an error.
        let _ = self.outlets.stats_tx.send(snapshot);
        true
    }

    fn report(&self, message: String) {
        log_error!("{message}");
        let _ = self.outlets.errors_tx.send(message);
    }

    fn set_status(&mut self, status: MonitorStatus) {
        self.status = status;
        self.outlets.status_tx.send_replace(status);
    }

    async fn spawn_ticker(&mut self) {
        self.cancel_ticker().await;

        let poll_tx = self.poll_tx.clone();
        let period = self.config.poll_interval();
        let token = self.current_session_token();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; start already refreshes.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(mpsc::error::TrySendError::Closed(_)) = poll_tx.try_send(()) {
                            break;
                        }
                    }
                }
            }
        });

        self.ticker = Some(handle);
        self.outlets.source_tx.send_replace(TriggerSource::Polling);
    }

    async fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
            // Join so no tick can land after stop returns.
            let _ = handle.await;
        }
    }

    async fn reopen_tail_at_end(&mut self) {
        let path = self.config.log_file_path.clone();
        let options = self.config.encoding_options();
        let reopen_path = path.clone();
        let reopened =
            tokio::task::spawn_blocking(move || TailReader::initialize(reopen_path, true, options))
                .await;
        self.tail = Some(match reopened {
            Ok(Ok(reader)) => reader,
            _ => TailReader::detached(path, options),
        });
    }

    fn current_session_token(&self) -> CancellationToken {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_session_token(&self) {
        let fresh = CancellationToken::new();
        match self.session.lock() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}

/// One tail step: rewind on truncation, then read whatever is new.
fn read_increment(tail: &mut TailReader) -> anyhow::Result<Option<TailBatch>> {
    let rewound = tail.handle_file_recreation()?;
    if !rewound && !tail.has_new_content() {
        return Ok(None);
    }

    let mut batch = tail.read_new_lines()?;
    batch.rewound |= rewound;
    Ok(Some(batch))
}
