use std::sync::Arc;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn, Instrument};
use crate::election::{LeaderLease, RoleState};
use crate::error::{Error, Result};
use crate::ingestion::thresholds::ThresholdTable;
use crate::interfaces::market_calendar::MarketCalendar;
use crate::interfaces::raw_tick_store::RawTickStore;
use crate::observability::metrics::{
    CACHE_WRITE_FAILURES, CHANGE_EVENTS_PUBLISHED, RAW_LOG_FAILURES, TICK_OUTCOMES,
};
use crate::observability::tracing::tick_span;
use crate::store::rate_cache::RateCacheStore;
use crate::types::rate::{round_rate, LatestRateRecord};
use crate::types::tick::Tick;

/// What ingesting one tick did to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// First observation for the pair.
    Initialized,
    /// First tick of a new trading day; change counters reset.
    DayRolled,
    /// Moved past the threshold; full write and one change event.
    Published,
    /// Inside the threshold; only the timestamp was refreshed.
    Refreshed,
    /// Cache read, write or publish failed and was swallowed.
    CacheFailed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Initialized => "initialized",
            TickOutcome::DayRolled => "day_rolled",
            TickOutcome::Published => "published",
            TickOutcome::Refreshed => "refreshed",
            TickOutcome::CacheFailed => "cache_failed",
        }
    }
}

/// Turns ticks into cache writes and change events. Leader only.
pub struct RateIngestionProcessor {
    cache: RateCacheStore,
    raw_log: Arc<dyn RawTickStore>,
    calendar: Arc<dyn MarketCalendar>,
    thresholds: ThresholdTable,
    role: Arc<RoleState>,
}

impl RateIngestionProcessor {
    pub fn new(
        cache: RateCacheStore,
        raw_log: Arc<dyn RawTickStore>,
        calendar: Arc<dyn MarketCalendar>,
        thresholds: ThresholdTable,
        role: Arc<RoleState>,
    ) -> Self {
        RateIngestionProcessor {
            cache,
            raw_log,
            calendar,
            thresholds,
            role,
        }
    }

    /// Ingest one tick under `lease`.
    ///
    /// Only a stale or foreign lease is an error. Store and raw-log failures
    /// are logged and counted; the health marker and raw log are attempted
    /// whatever happened to the cache.
    pub async fn process_tick(&self, lease: &LeaderLease, tick: &Tick) -> Result<TickOutcome> {
        if !self.role.is_current(lease) {
            return Err(Error::NotLeader);
        }
        // Judged at cache precision; a rate that rounds to zero is no rate.
        let rate = round_rate(tick.rate);
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::InvalidRate(tick.rate));
        }

        async {
            let outcome = match self.update_cache(tick, rate).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    CACHE_WRITE_FAILURES.inc();
                    warn!(error = %e, "Rate cache update failed");
                    TickOutcome::CacheFailed
                }
            };

            if let Err(e) = self.cache.set_health(&tick.pair.base, Utc::now()).await {
                CACHE_WRITE_FAILURES.inc();
                warn!(error = %e, "Health marker update failed");
            }

            if let Err(e) = self.raw_log.append(tick).await {
                RAW_LOG_FAILURES.inc();
                warn!(error = %e, "Raw tick append failed");
            }

            TICK_OUTCOMES.with_label_values(&[outcome.as_str()]).inc();
            debug!(outcome = outcome.as_str(), rate = tick.rate, "Tick processed");
            Ok(outcome)
        }
        .instrument(tick_span(&tick.pair))
        .await
    }

    async fn update_cache(&self, tick: &Tick, rate: f64) -> Result<TickOutcome> {
        let pair = &tick.pair;

        // A non-positive stored rate has no usable baseline; start over.
        let stored = self.cache.get_rate_and_timestamp(pair).await?
            .filter(|(stored_rate, _)| *stored_rate > 0.0);
        let Some((stored_rate, stored_at)) = stored else {
            self.cache.put_rate(pair, &LatestRateRecord::flat(rate, tick.timestamp)).await?;
            return Ok(TickOutcome::Initialized);
        };

        if self.calendar.is_new_trading_day(tick.timestamp, stored_at) {
            // The previous close is carried into the new day unchanged.
            self.cache.put_rate(pair, &LatestRateRecord::flat(stored_rate, tick.timestamp)).await?;
            return Ok(TickOutcome::DayRolled);
        }

        let change = round_rate(rate - stored_rate);
        let change_pct = change / stored_rate * 100.0;

        if !self.thresholds.is_significant(&pair.quote, stored_rate, change_pct) {
            self.cache.touch_timestamp(pair, tick.timestamp).await?;
            return Ok(TickOutcome::Refreshed);
        }

        let record = LatestRateRecord {
            rate,
            change,
            change_pct,
            timestamp: tick.timestamp,
        };
        self.cache.put_rate(pair, &record).await?;
        let receivers = self.cache.publish_change(pair, &record).await?;
        CHANGE_EVENTS_PUBLISHED.inc();
        debug!(change, change_pct, receivers, "Published rate change");
        Ok(TickOutcome::Published)
    }
}
