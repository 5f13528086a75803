use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::types::pair::CurrencyPair;

/// One upstream price observation for a currency pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub pair: CurrencyPair,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(pair: CurrencyPair, rate: f64, timestamp: DateTime<Utc>) -> Self {
        Tick { pair, rate, timestamp }
    }
}
