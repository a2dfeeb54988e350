mod types;

pub use types::HistorySummary;

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

use crate::models::{Statistics, TrendAnalysisResult};
use crate::trend;

/// Bounded record of published snapshots; the oldest are evicted first.
pub struct StatsHistory {
    inner: Arc<Mutex<HistoryState>>,
}

struct HistoryState {
    snapshots: VecDeque<Statistics>,
    capacity: usize,
    dropped: u64,
}

impl StatsHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(HistoryState {
                snapshots: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                dropped: 0,
            })),
        }
    }

    pub async fn record(&self, snapshot: Statistics) {
        let mut state = self.inner.lock().await;
        state.snapshots.push_back(snapshot);
        while state.snapshots.len() > state.capacity {
            state.snapshots.pop_front();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.snapshots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.snapshots.is_empty()
    }

    /// Change the retention bound, evicting the oldest snapshots if needed.
    pub async fn set_capacity(&self, capacity: usize) {
        let mut state = self.inner.lock().await;
        state.capacity = capacity.max(1);
        while state.snapshots.len() > state.capacity {
            state.snapshots.pop_front();
        }
    }

    pub async fn snapshots(&self) -> Vec<Statistics> {
        self.inner.lock().await.snapshots.iter().cloned().collect()
    }

    pub async fn analyze(&self, moving_average_period: usize) -> TrendAnalysisResult {
        let series = self.snapshots().await;
        trend::analyze(&series, moving_average_period)
    }

    pub async fn summary(&self) -> HistorySummary {
        let state = self.inner.lock().await;
        let (Some(first), Some(last)) = (state.snapshots.front(), state.snapshots.back()) else {
            return HistorySummary {
                dropped: state.dropped,
                ..HistorySummary::default()
            };
        };

        let peak_ratio = state
            .snapshots
            .iter()
            .map(|s| s.ratio)
            .fold(0.0, f64::max);

        HistorySummary {
            snapshot_count: state.snapshots.len(),
            first_timestamp: Some(first.timestamp),
            last_timestamp: Some(last.timestamp),
            dumps: last.dumps,
            stacks: last.stacks,
            warnings: last.warnings,
            errors: last.errors,
            latest_ratio: last.ratio,
            peak_ratio,
            dropped: state.dropped,
        }
    }

    pub async fn clear(&self) {
        let mut state = self.inner.lock().await;
        state.snapshots.clear();
        state.dropped = 0;
    }

    /// Record every snapshot from `stats` until the channel closes.
    pub fn spawn_recorder(&self, mut stats: broadcast::Receiver<Statistics>) -> JoinHandle<()> {
        let history = self.clone();
        tokio::spawn(async move {
            loop {
                match stats.recv().await {
                    Ok(snapshot) => history.record(snapshot).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("history recorder fell behind; {} snapshots missed", missed);
                        history.inner.lock().await.dropped += missed;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("history recorder finished");
        })
    }
}

impl Clone for StatsHistory {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
