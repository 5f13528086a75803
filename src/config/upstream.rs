use std::collections::HashMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::types::pair::CurrencyPair;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub base_currency: String,
    pub quote_currencies: Vec<String>,
    /// Cap on how often the vendor pushes updates per asset.
    pub update_limit_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Bound on the WebSocket handshake plus the hello message.
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn pairs(&self) -> Vec<CurrencyPair> {
        self.quote_currencies.iter()
            .map(|quote| CurrencyPair::new(&self.base_currency, quote))
            .collect()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            url: "wss://ws.coinapi.io/v1/".to_string(),
            api_key: String::new(),
            base_currency: "USD".to_string(),
            quote_currencies: vec![
                "KRW".to_string(),
                "JPY".to_string(),
                "EUR".to_string(),
                "CNY".to_string(),
                "GBP".to_string(),
            ],
            update_limit_ms: 1000,
            max_retries: 5,
            retry_delay_ms: 5000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
    /// Maximum per-step move, in percent.
    pub volatility_pct: f64,
    /// Starting rate per quote currency; unknown quotes start at 1.0.
    pub seed_rates: HashMap<String, f64>,
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn seed_rate(&self, quote: &str) -> f64 {
        self.seed_rates.iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(quote))
            .map(|(_, rate)| *rate)
            .unwrap_or(1.0)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let seed_rates = [
            ("KRW", 1350.0),
            ("JPY", 150.0),
            ("EUR", 0.92),
            ("CNY", 7.2),
            ("GBP", 0.79),
        ]
        .into_iter()
        .map(|(quote, rate)| (quote.to_string(), rate))
        .collect();

        SimulatorConfig {
            interval_ms: 1000,
            volatility_pct: 0.05,
            seed_rates,
        }
    }
}
