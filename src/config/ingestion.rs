use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Minimum movement before a tick is publishable.
///
/// The effective threshold, in percent of the stored rate, is
/// `max(pct_floor, abs_floor / rate * 100)`. Reserve currencies move in small
/// percentages; high-denomination currencies need an absolute floor so that
/// one-unit jitter is not treated as news.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ThresholdRule {
    pub pct_floor: f64,
    pub abs_floor: f64,
}

impl ThresholdRule {
    pub const fn new(pct_floor: f64, abs_floor: f64) -> Self {
        ThresholdRule { pct_floor, abs_floor }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Capacity of the tick bus between transports and ingestion.
    pub channel_capacity: usize,
    /// Capacity of each per-pair worker queue.
    pub pair_queue_capacity: usize,
    pub default_threshold: ThresholdRule,
    /// Keyed by quote currency.
    pub thresholds: HashMap<String, ThresholdRule>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let thresholds = [
            ("KRW", ThresholdRule::new(0.2, 1.0)),
            ("JPY", ThresholdRule::new(0.2, 0.1)),
            ("IDR", ThresholdRule::new(0.2, 10.0)),
            ("VND", ThresholdRule::new(0.2, 20.0)),
            ("EUR", ThresholdRule::new(0.1, 0.0005)),
            ("GBP", ThresholdRule::new(0.1, 0.0005)),
            ("CHF", ThresholdRule::new(0.1, 0.0005)),
            ("CNY", ThresholdRule::new(0.1, 0.005)),
        ]
        .into_iter()
        .map(|(quote, rule)| (quote.to_string(), rule))
        .collect();

        IngestionConfig {
            channel_capacity: 4096,
            pair_queue_capacity: 256,
            default_threshold: ThresholdRule::new(0.2, 0.0),
            thresholds,
        }
    }
}
