pub mod controller;
pub mod loop_worker;
pub mod types;

pub use controller::{ChangeNotifier, DEFAULT_DEBOUNCE};
pub use types::{ChangeKind, FileChange, WatcherError};
