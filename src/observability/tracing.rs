use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::config::{LogConfig, LogFormat};
use crate::types::pair::CurrencyPair;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

pub fn tick_span(pair: &CurrencyPair) -> Span {
    tracing::debug_span!(
        "tick",
        pair = %pair,
    )
}

pub fn election_span(instance_id: &str) -> Span {
    tracing::info_span!(
        "election",
        instance_id = %instance_id,
    )
}
