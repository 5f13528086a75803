pub mod change_consumer;
pub mod market_calendar;
pub mod raw_tick_store;
