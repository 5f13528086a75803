use std::sync::Arc;
use chrono::{DateTime, SecondsFormat, Utc};
use crate::error::{Error, Result};
use crate::store::{MessageStream, SharedStore};
use crate::types::pair::CurrencyPair;
use crate::types::rate::LatestRateRecord;

pub const FIELD_RATE: &str = "rate";
pub const FIELD_CHANGE: &str = "change";
pub const FIELD_CHANGE_PCT: &str = "changePct";
pub const FIELD_TIMESTAMP: &str = "timestamp";

const ALL_FIELDS: [&str; 4] = [FIELD_RATE, FIELD_CHANGE, FIELD_CHANGE_PCT, FIELD_TIMESTAMP];

/// Rate hashes, health markers and change channels, all under one
/// namespace.
///
/// - `{ns}:{BASE}/{QUOTE}`: hash with rate, change, changePct, timestamp;
///   also the pub/sub channel for that pair.
/// - `{ns}:health:{BASE}`: time the last tick for that base was accepted.
#[derive(Clone)]
pub struct RateCacheStore {
    store: Arc<dyn SharedStore>,
    namespace: String,
}

impl RateCacheStore {
    pub fn new(store: Arc<dyn SharedStore>, namespace: &str) -> Self {
        RateCacheStore {
            store,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pair_key(&self, pair: &CurrencyPair) -> String {
        format!("{}:{}", self.namespace, pair)
    }

    pub fn health_key(&self, base: &str) -> String {
        format!("{}:health:{}", self.namespace, base.to_uppercase())
    }

    pub fn channel_pattern(&self) -> String {
        format!("{}:*", self.namespace)
    }

    /// Recover the pair from a `{ns}:{BASE}/{QUOTE}` channel name.
    pub fn parse_channel(&self, channel: &str) -> Result<CurrencyPair> {
        channel.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| Error::InvalidChannel(channel.to_string()))?
            .parse()
            .map_err(|_| Error::InvalidChannel(channel.to_string()))
    }

    pub async fn get_rate(&self, pair: &CurrencyPair) -> Result<Option<LatestRateRecord>> {
        let values = self.store.hmget(&self.pair_key(pair), &ALL_FIELDS).await?;
        let [rate, change, change_pct, timestamp]: [Option<String>; 4] = values
            .try_into()
            .map_err(|_| Error::StoreError("hmget returned wrong field count".to_string()))?;

        let (Some(rate), Some(timestamp)) = (rate, timestamp) else {
            return Ok(None);
        };

        Ok(Some(LatestRateRecord {
            rate: parse_f64(&rate)?,
            change: change.as_deref().map(parse_f64).transpose()?.unwrap_or(0.0),
            change_pct: change_pct.as_deref().map(parse_f64).transpose()?.unwrap_or(0.0),
            timestamp: parse_timestamp(&timestamp)?,
        }))
    }

    /// Partial read of just the fields ingestion compares against.
    pub async fn get_rate_and_timestamp(
        &self,
        pair: &CurrencyPair,
    ) -> Result<Option<(f64, DateTime<Utc>)>> {
        let values = self.store
            .hmget(&self.pair_key(pair), &[FIELD_RATE, FIELD_TIMESTAMP])
            .await?;

        match values.as_slice() {
            [Some(rate), Some(timestamp)] => {
                Ok(Some((parse_f64(rate)?, parse_timestamp(timestamp)?)))
            }
            _ => Ok(None),
        }
    }

    pub async fn put_rate(&self, pair: &CurrencyPair, record: &LatestRateRecord) -> Result<()> {
        let fields = [
            (FIELD_RATE, record.rate.to_string()),
            (FIELD_CHANGE, record.change.to_string()),
            (FIELD_CHANGE_PCT, record.change_pct.to_string()),
            (FIELD_TIMESTAMP, format_timestamp(record.timestamp)),
        ];
        self.store.hset(&self.pair_key(pair), &fields).await
    }

    /// Freshness-only update: rewrites `timestamp` and nothing else.
    pub async fn touch_timestamp(&self, pair: &CurrencyPair, timestamp: DateTime<Utc>) -> Result<()> {
        self.store
            .hset(&self.pair_key(pair), &[(FIELD_TIMESTAMP, format_timestamp(timestamp))])
            .await
    }

    pub async fn set_health(&self, base: &str, at: DateTime<Utc>) -> Result<()> {
        self.store.set(&self.health_key(base), &format_timestamp(at)).await
    }

    pub async fn get_health(&self, base: &str) -> Result<Option<DateTime<Utc>>> {
        self.store
            .get(&self.health_key(base))
            .await?
            .as_deref()
            .map(parse_timestamp)
            .transpose()
    }

    pub async fn publish_change(&self, pair: &CurrencyPair, record: &LatestRateRecord) -> Result<usize> {
        let payload = serde_json::to_string(record)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        self.store.publish(&self.pair_key(pair), &payload).await
    }

    pub async fn subscribe_changes(&self) -> Result<MessageStream> {
        self.store.psubscribe(&self.channel_pattern()).await
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::DeserializationError(format!("timestamp {:?}: {}", s, e)))
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| Error::DeserializationError(format!("not a number: {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn cache() -> RateCacheStore {
        RateCacheStore::new(Arc::new(MemoryStore::new()), "rates")
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn keys_and_channels_are_namespaced() {
        let cache = cache();
        let pair = CurrencyPair::new("EUR", "KRW");
        assert_eq!(cache.pair_key(&pair), "rates:EUR/KRW");
        assert_eq!(cache.health_key("eur"), "rates:health:EUR");
        assert_eq!(cache.channel_pattern(), "rates:*");
        assert_eq!(cache.parse_channel("rates:EUR/KRW").unwrap(), pair);
        assert!(cache.parse_channel("rates:health:EUR").is_err());
        assert!(cache.parse_channel("other:EUR/KRW").is_err());
    }

    #[tokio::test]
    async fn record_round_trips_through_hash() {
        let cache = cache();
        let pair = CurrencyPair::new("EUR", "KRW");
        assert!(cache.get_rate(&pair).await.unwrap().is_none());

        let record = LatestRateRecord {
            rate: 1503.5,
            change: 3.5,
            change_pct: 0.233333,
            timestamp: ts("2024-03-04T10:00:00.250Z"),
        };
        cache.put_rate(&pair, &record).await.unwrap();
        assert_eq!(cache.get_rate(&pair).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn touch_only_changes_timestamp() {
        let cache = cache();
        let pair = CurrencyPair::new("EUR", "KRW");
        let record = LatestRateRecord {
            rate: 1500.0,
            change: 1.0,
            change_pct: 0.066667,
            timestamp: ts("2024-03-04T10:00:00Z"),
        };
        cache.put_rate(&pair, &record).await.unwrap();
        cache.touch_timestamp(&pair, ts("2024-03-04T10:05:00Z")).await.unwrap();

        let stored = cache.get_rate(&pair).await.unwrap().unwrap();
        assert_eq!(stored.rate, 1500.0);
        assert_eq!(stored.change, 1.0);
        assert_eq!(stored.timestamp, ts("2024-03-04T10:05:00Z"));
        assert_eq!(
            cache.get_rate_and_timestamp(&pair).await.unwrap(),
            Some((1500.0, ts("2024-03-04T10:05:00Z")))
        );
    }

    #[tokio::test]
    async fn health_marker_round_trips() {
        let cache = cache();
        assert!(cache.get_health("USD").await.unwrap().is_none());
        cache.set_health("USD", ts("2024-03-04T10:00:00Z")).await.unwrap();
        assert_eq!(cache.get_health("usd").await.unwrap(), Some(ts("2024-03-04T10:00:00Z")));
    }
}
