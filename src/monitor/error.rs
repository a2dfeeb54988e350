#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor has been disposed")]
    Disposed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("monitor worker is no longer running")]
    WorkerGone,
}
