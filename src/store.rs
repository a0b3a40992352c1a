pub mod stats;

pub use stats::{StatsLogger, StatsRecord};
