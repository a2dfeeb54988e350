use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use log::{info, warn};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::models::Statistics;

use super::worker::{MonitorCommand, MonitorWorker, Outlets};
use super::{MonitorConfig, MonitorError, MonitorStatus, TriggerSource};

/// How long `dispose` waits for the worker before aborting it.
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_QUEUE: usize = 16;
const BROADCAST_CAPACITY: usize = 256;

struct Shared {
    commands: mpsc::Sender<MonitorCommand>,
    stats_tx: broadcast::Sender<Statistics>,
    errors_tx: broadcast::Sender<String>,
    last_stats: watch::Receiver<Option<Statistics>>,
    status: watch::Receiver<MonitorStatus>,
    source: watch::Receiver<TriggerSource>,
    config: watch::Receiver<MonitorConfig>,
    session: Arc<Mutex<CancellationToken>>,
    disposed: AtomicBool,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the monitor. Cheap to clone; all clones drive the same worker.
///
/// Statistics and error subscribers receive messages in production order.
/// A subscriber that falls more than the channel capacity behind gets
/// `RecvError::Lagged` and resumes from the oldest retained message.
#[derive(Clone)]
pub struct MonitorController {
    inner: Arc<Shared>,
}

impl MonitorController {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn new(config: MonitorConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (stats_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (errors_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (last_tx, last_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(MonitorStatus::Stopped);
        let (source_tx, source_rx) = watch::channel(TriggerSource::Idle);
        let (config_tx, config_rx) = watch::channel(config.clone());
        let session = Arc::new(Mutex::new(CancellationToken::new()));

        let worker = MonitorWorker::new(
            config,
            session.clone(),
            Outlets {
                stats_tx: stats_tx.clone(),
                errors_tx: errors_tx.clone(),
                last_tx,
                status_tx,
                source_tx,
                config_tx,
            },
        );
        let handle = tokio::spawn(worker.run(commands_rx));

        Self {
            inner: Arc::new(Shared {
                commands: commands_tx,
                stats_tx,
                errors_tx,
                last_stats: last_rx,
                status: status_rx,
                source: source_rx,
                config: config_rx,
                session,
                disposed: AtomicBool::new(false),
                worker: tokio::sync::Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn subscribe_statistics(&self) -> broadcast::Receiver<Statistics> {
        self.inner.stats_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors_tx.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<MonitorStatus> {
        self.inner.status.clone()
    }

    pub fn status(&self) -> MonitorStatus {
        *self.inner.status.borrow()
    }

    pub fn is_monitoring(&self) -> bool {
        self.status() == MonitorStatus::Monitoring
    }

    /// Whether cycles are driven by the file watcher, the polling ticker, or nothing.
    pub fn trigger_source(&self) -> TriggerSource {
        *self.inner.source.borrow()
    }

    pub fn last_stats(&self) -> Option<Statistics> {
        self.inner.last_stats.borrow().clone()
    }

    pub fn config(&self) -> MonitorConfig {
        self.inner.config.borrow().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Start monitoring. A no-op when already monitoring.
    ///
    /// Configuration problems are published on the error channel and leave
    /// the monitor stopped; check [`is_monitoring`](Self::is_monitoring).
    pub async fn start(&self) -> Result<(), MonitorError> {
        self.start_with_cancel(CancellationToken::new()).await
    }

    /// Like [`start`](Self::start); cancelling `cancel` before the initial
    /// refresh completes rolls the monitor back to stopped.
    pub async fn start_with_cancel(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        self.ensure_live()?;
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::Start { cancel, reply }).await?;
        rx.await.map_err(|_| MonitorError::WorkerGone)?
    }

    /// Stop monitoring. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        self.stop_with_cancel(CancellationToken::new()).await
    }

    /// Like [`stop`](Self::stop). Cancelling `cancel` only stops the wait;
    /// the stop itself still goes through.
    pub async fn stop_with_cancel(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        self.ensure_live()?;
        self.cancel_session();

        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::Stop { reply }).await?;
        tokio::select! {
            acked = rx => acked.map_err(|_| MonitorError::WorkerGone),
            _ = cancel.cancelled() => Err(MonitorError::Cancelled),
        }
    }

    /// Swap the configuration, restarting when currently monitoring.
    pub async fn update_configuration(&self, config: MonitorConfig) -> Result<(), MonitorError> {
        self.ensure_live()?;
        if self.is_monitoring() {
            self.cancel_session();
        }
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::UpdateConfig { config, reply }).await?;
        rx.await.map_err(|_| MonitorError::WorkerGone)
    }

    /// Re-parse the whole file and publish the result if it changed.
    ///
    /// Returns `Ok(None)` when the refresh failed; the reason goes to the
    /// error channel.
    pub async fn force_update(&self) -> Result<Option<Statistics>, MonitorError> {
        self.force_update_with_cancel(CancellationToken::new()).await
    }

    pub async fn force_update_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<Statistics>, MonitorError> {
        self.ensure_live()?;
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::ForceUpdate { cancel, reply }).await?;
        rx.await.map_err(|_| MonitorError::WorkerGone)?
    }

    /// Stop monitoring and release the worker. Safe to call more than once.
    ///
    /// Waits at most [`DISPOSE_TIMEOUT`] for the worker to finish, then aborts it.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel_session();
        let deadline = time::Instant::now() + DISPOSE_TIMEOUT;
        // A closed queue means the worker is already gone.
        if time::timeout_at(deadline, self.inner.commands.send(MonitorCommand::Shutdown))
            .await
            .is_err()
        {
            warn!("monitor command queue stayed full; shutdown not delivered");
        }

        let Some(mut handle) = self.inner.worker.lock().await.take() else {
            return;
        };

        match time::timeout_at(deadline, &mut handle).await {
            Ok(_) => info!("monitor disposed"),
            Err(_) => {
                warn!(
                    "monitor worker did not stop within {:?}; aborting",
                    DISPOSE_TIMEOUT
                );
                handle.abort();
            }
        }
    }

    fn ensure_live(&self) -> Result<(), MonitorError> {
        if self.is_disposed() {
            Err(MonitorError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn send(&self, command: MonitorCommand) -> Result<(), MonitorError> {
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| MonitorError::WorkerGone)
    }

    fn cancel_session(&self) {
        match self.inner.session.lock() {
            Ok(guard) => guard.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }
}
