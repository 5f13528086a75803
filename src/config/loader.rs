use crate::config::ingestion::IngestionConfig;
use crate::config::upstream::{SimulatorConfig, UpstreamConfig};
use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub election: ElectionConfig,
    pub transport: TransportConfig,
    pub upstream: UpstreamConfig,
    pub simulator: SimulatorConfig,
    pub ingestion: IngestionConfig,
    pub calendar: CalendarConfig,
    pub raw_log: RawLogConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("RATE_RELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upstream.quote_currencies")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let app: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.quote_currencies.is_empty() {
            return Err(Error::ConfigError("upstream.quote_currencies is empty".to_string()));
        }
        if self.upstream.base_currency.trim().is_empty() {
            return Err(Error::ConfigError("upstream.base_currency is empty".to_string()));
        }
        if self.election.ttl_secs == 0 {
            return Err(Error::ConfigError("election.ttl_secs must be positive".to_string()));
        }
        if !(self.election.renew_ratio > 0.0 && self.election.renew_ratio < 1.0) {
            return Err(Error::ConfigError(format!(
                "election.renew_ratio must be in (0, 1), got {}",
                self.election.renew_ratio
            )));
        }
        if self.node.namespace.is_empty() {
            return Err(Error::ConfigError("node.namespace is empty".to_string()));
        }
        Ok(())
    }
}
