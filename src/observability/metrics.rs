use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Tick metrics
    pub static ref TICKS_RECEIVED: IntCounter = IntCounter::new(
        "ticks_received_total",
        "Ticks emitted by upstream transports"
    ).expect("metric");

    pub static ref TICKS_DROPPED: IntCounter = IntCounter::new(
        "ticks_dropped_total",
        "Ticks dropped because the tick bus was full or this node is not leader"
    ).expect("metric");

    pub static ref TICK_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("tick_outcomes_total", "Ingestion outcome per processed tick"),
        &["outcome"]
    ).expect("metric");

    pub static ref CHANGE_EVENTS_PUBLISHED: IntCounter = IntCounter::new(
        "change_events_published_total",
        "Change events published on pair channels"
    ).expect("metric");

    pub static ref CACHE_WRITE_FAILURES: IntCounter = IntCounter::new(
        "cache_write_failures_total",
        "Cache writes or publishes that failed during ingestion"
    ).expect("metric");

    pub static ref RAW_LOG_FAILURES: IntCounter = IntCounter::new(
        "raw_log_failures_total",
        "Raw tick appends that failed"
    ).expect("metric");

    // Leadership metrics
    pub static ref ELECTIONS_WON: IntCounter = IntCounter::new(
        "leader_elections_won_total",
        "Times this node acquired the leader lock"
    ).expect("metric");

    pub static ref IS_LEADER: IntGauge = IntGauge::new(
        "is_leader",
        "1 while this node holds the leader lock"
    ).expect("metric");

    // Transport metrics
    pub static ref TRANSPORT_FAILOVERS: IntCounter = IntCounter::new(
        "transport_failovers_total",
        "Switches from the primary to the secondary transport"
    ).expect("metric");

    pub static ref UPSTREAM_RECONNECTS: IntCounter = IntCounter::new(
        "upstream_reconnects_total",
        "Reconnect attempts made by upstream sources"
    ).expect("metric");

    pub static ref CHANGES_PROPAGATED: IntCounter = IntCounter::new(
        "changes_propagated_total",
        "Change events received from the shared store and re-emitted locally"
    ).expect("metric");
}

/// Register all collectors. Safe to call more than once.
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(TICKS_RECEIVED.clone()));
    let _ = REGISTRY.register(Box::new(TICKS_DROPPED.clone()));
    let _ = REGISTRY.register(Box::new(TICK_OUTCOMES.clone()));
    let _ = REGISTRY.register(Box::new(CHANGE_EVENTS_PUBLISHED.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_WRITE_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(RAW_LOG_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(ELECTIONS_WON.clone()));
    let _ = REGISTRY.register(Box::new(IS_LEADER.clone()));
    let _ = REGISTRY.register(Box::new(TRANSPORT_FAILOVERS.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_RECONNECTS.clone()));
    let _ = REGISTRY.register(Box::new(CHANGES_PROPAGATED.clone()));
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
