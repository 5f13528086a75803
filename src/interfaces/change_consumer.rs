use async_trait::async_trait;
use crate::types::pair::CurrencyPair;
use crate::types::rate::LatestRateRecord;

/// Downstream reaction to a propagated rate change (SSE push, alerts).
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    async fn on_rate_change(&self, pair: &CurrencyPair, record: &LatestRateRecord);
}

pub struct LoggingChangeConsumer;

#[async_trait]
impl ChangeConsumer for LoggingChangeConsumer {
    async fn on_rate_change(&self, pair: &CurrencyPair, record: &LatestRateRecord) {
        tracing::info!(
            pair = %pair,
            rate = record.rate,
            change = record.change,
            change_pct = record.change_pct,
            "Rate changed"
        );
    }
}
