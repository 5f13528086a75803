use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod ingestion;
pub mod upstream;
pub mod loader;

pub use loader::AppConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Prefix for every cache key and pub/sub channel.
    pub namespace: String,
    /// Fixed lock holder id; a random UUID is used when unset.
    pub instance_id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            namespace: "rates".to_string(),
            instance_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub lock_key: String,
    pub ttl_secs: u64,
    /// Fraction of the TTL after which the lock is renewed.
    pub renew_ratio: f64,
    pub watch_interval_secs: u64,
}

impl ElectionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        self.ttl().mul_f64(self.renew_ratio)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            lock_key: "rates:leader-lock".to_string(),
            ttl_secs: 60,
            renew_ratio: 0.75,  // 45s
            watch_interval_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub health_poll_secs: u64,
    /// A heartbeat older than this marks the transport unhealthy.
    pub staleness_secs: u64,
    /// Upper bound on a single source connect, whatever the source does.
    pub connect_timeout_secs: u64,
}

impl TransportConfig {
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            health_poll_secs: 10,
            staleness_secs: 60,
            connect_timeout_secs: 15,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub trade_weekends: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawLogConfig {
    /// JSON-lines file for raw ticks; kept in memory when unset.
    pub path: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind_addr: "0.0.0.0:9100".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
