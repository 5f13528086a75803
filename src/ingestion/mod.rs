pub mod dispatcher;
pub mod processor;
pub mod thresholds;

pub use dispatcher::TickDispatcher;
pub use processor::{RateIngestionProcessor, TickOutcome};
pub use thresholds::ThresholdTable;
