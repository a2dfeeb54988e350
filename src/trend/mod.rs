pub mod analyzer;
pub mod stats;

pub use analyzer::{analyze, calculate_trend, DEFAULT_MOVING_AVERAGE_PERIOD};
