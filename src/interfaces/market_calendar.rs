use chrono::{DateTime, Datelike, Utc, Weekday};
use crate::config::CalendarConfig;

/// Trading-hours policy consulted before election and during ingestion.
#[cfg_attr(test, mockall::automock)]
pub trait MarketCalendar: Send + Sync {
    fn is_market_open(&self, now: DateTime<Utc>) -> bool;

    /// Whether `current` falls on a later trading day than `previous`.
    fn is_new_trading_day(&self, current: DateTime<Utc>, previous: DateTime<Utc>) -> bool;
}

/// Weekdays are open, weekends closed unless `trade_weekends` is set.
/// Trading days are UTC calendar days.
#[derive(Clone, Debug, Default)]
pub struct WeekdayCalendar {
    trade_weekends: bool,
}

impl WeekdayCalendar {
    pub fn new(config: &CalendarConfig) -> Self {
        WeekdayCalendar {
            trade_weekends: config.trade_weekends,
        }
    }

    pub fn always_open() -> Self {
        WeekdayCalendar { trade_weekends: true }
    }
}

impl MarketCalendar for WeekdayCalendar {
    fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        self.trade_weekends || !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn is_new_trading_day(&self, current: DateTime<Utc>, previous: DateTime<Utc>) -> bool {
        current.date_naive() > previous.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn weekends_are_closed_by_default() {
        let calendar = WeekdayCalendar::default();
        assert!(calendar.is_market_open(at("2024-03-08T23:59:00Z")));   // Friday
        assert!(!calendar.is_market_open(at("2024-03-09T12:00:00Z")));  // Saturday
        assert!(!calendar.is_market_open(at("2024-03-10T12:00:00Z")));  // Sunday
        assert!(WeekdayCalendar::always_open().is_market_open(at("2024-03-09T12:00:00Z")));
    }

    #[test]
    fn new_trading_day_is_a_later_utc_date() {
        let calendar = WeekdayCalendar::default();
        assert!(calendar.is_new_trading_day(at("2024-03-05T00:00:01Z"), at("2024-03-04T23:59:59Z")));
        assert!(!calendar.is_new_trading_day(at("2024-03-04T23:59:59Z"), at("2024-03-04T00:00:00Z")));
        assert!(!calendar.is_new_trading_day(at("2024-03-04T10:00:00Z"), at("2024-03-05T10:00:00Z")));
    }
}
