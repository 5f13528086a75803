use std::collections::HashMap;
use crate::config::ingestion::{IngestionConfig, ThresholdRule};

/// Per-quote-currency publish thresholds.
#[derive(Clone, Debug)]
pub struct ThresholdTable {
    default_rule: ThresholdRule,
    rules: HashMap<String, ThresholdRule>,
}

impl ThresholdTable {
    pub fn new(config: &IngestionConfig) -> Self {
        ThresholdTable {
            default_rule: config.default_threshold,
            rules: config.thresholds.iter()
                .map(|(quote, rule)| (quote.to_uppercase(), *rule))
                .collect(),
        }
    }

    pub fn rule(&self, quote: &str) -> ThresholdRule {
        self.rules.get(&quote.to_uppercase()).copied().unwrap_or(self.default_rule)
    }

    /// Threshold in percent of `stored_rate` for a move to count as a change.
    pub fn threshold_pct(&self, quote: &str, stored_rate: f64) -> f64 {
        let rule = self.rule(quote);
        if stored_rate > 0.0 && rule.abs_floor > 0.0 {
            rule.pct_floor.max(rule.abs_floor / stored_rate * 100.0)
        } else {
            rule.pct_floor
        }
    }

    /// Strictly greater than the threshold; a move exactly on it is noise.
    pub fn is_significant(&self, quote: &str, stored_rate: f64, change_pct: f64) -> bool {
        change_pct.abs() > self.threshold_pct(quote, stored_rate)
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new(&IngestionConfig::default())
    }
}
