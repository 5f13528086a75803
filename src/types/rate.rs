use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const RATE_SCALE: f64 = 1_000_000.0;  // 6 decimal places

/// Round a rate (or a change derived from rates) to 6 decimal places.
pub fn round_rate(value: f64) -> f64 {
    (value * RATE_SCALE).round() / RATE_SCALE
}

/// Latest cached observation for one currency pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestRateRecord {
    pub rate: f64,
    pub change: f64,
    #[serde(rename = "changePct")]
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl LatestRateRecord {
    /// A record with no movement, used for first sight and day rollover.
    pub fn flat(rate: f64, timestamp: DateTime<Utc>) -> Self {
        LatestRateRecord {
            rate,
            change: 0.0,
            change_pct: 0.0,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rounds_to_six_decimals() {
        assert_eq!(round_rate(1500.1234564), 1500.123456);
        assert_eq!(round_rate(1500.1234565), 1500.123457);
        assert_eq!(round_rate(0.0000004), 0.0);
    }

    #[test]
    fn serializes_change_pct_in_camel_case() {
        let ts = "2024-03-04T10:00:00Z".parse().unwrap();
        let json = serde_json::to_value(LatestRateRecord::flat(1.5, ts)).unwrap();
        assert_eq!(json["changePct"], 0.0);
        assert_eq!(json["timestamp"], "2024-03-04T10:00:00Z");
    }

    proptest! {
        #[test]
        fn rounding_is_idempotent(v in 0.0f64..1_000_000.0) {
            let once = round_rate(v);
            prop_assert!((round_rate(once) - once).abs() < 1e-9);
            prop_assert!((once - v).abs() <= 0.5e-6 + 1e-9);
        }
    }
}
