pub mod config;
pub mod controller;
pub mod error;
pub mod state;
mod worker;

pub use config::MonitorConfig;
pub use controller::{MonitorController, DISPOSE_TIMEOUT};
pub use error::MonitorError;
pub use state::{MonitorStatus, TriggerSource};
pub(crate) use state::Trigger;
