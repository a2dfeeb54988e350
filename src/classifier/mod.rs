pub mod aggregate;
pub mod rules;

pub use aggregate::{aggregate, aggregate_lines};
pub use rules::{classify, classify_all};
