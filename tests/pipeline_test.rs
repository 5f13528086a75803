use std::sync::Arc;
use std::time::Duration;
use rate_relay::app::{RelayNode, SourcePair};
use rate_relay::config::upstream::SimulatorConfig;
use rate_relay::config::AppConfig;
use rate_relay::election::Role;
use rate_relay::interfaces::change_consumer::ChangeConsumer;
use rate_relay::interfaces::raw_tick_store::MemoryTickLog;
use rate_relay::price_infra::connectors::simulated::SimulatedSource;
use rate_relay::price_infra::connectors::TickSource;
use rate_relay::price_infra::transport::ActiveTransport;
use rate_relay::price_infra::TickSender;
use rate_relay::store::memory::MemoryStore;
use rate_relay::types::pair::CurrencyPair;

fn config(instance: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.node.instance_id = Some(instance.to_string());
    config.calendar.trade_weekends = true;
    config.upstream.quote_currencies = vec!["KRW".to_string()];
    config.simulator = SimulatorConfig {
        interval_ms: 100,
        volatility_pct: 5.0,
        ..SimulatorConfig::default()
    };
    config
}

fn simulated_pair(config: &AppConfig, ticks: TickSender) -> SourcePair {
    let primary: Arc<dyn TickSource> =
        Arc::new(SimulatedSource::new(&config.upstream, config.simulator.clone(), ticks.clone()));
    let secondary: Arc<dyn TickSource> =
        Arc::new(SimulatedSource::new(&config.upstream, config.simulator.clone(), ticks));
    (primary, secondary)
}

fn node(instance: &str, store: &Arc<MemoryStore>, raw_log: &Arc<MemoryTickLog>) -> RelayNode {
    RelayNode::assemble(
        config(instance),
        store.clone(),
        raw_log.clone(),
        Vec::<Arc<dyn ChangeConsumer>>::new(),
        simulated_pair,
    )
}

#[tokio::test(start_paused = true)]
async fn leader_ticks_reach_worker_subscribers() {
    let store = Arc::new(MemoryStore::new());
    let leader_log = Arc::new(MemoryTickLog::new());
    let worker_log = Arc::new(MemoryTickLog::new());
    let leader = node("node-a", &store, &leader_log);
    let worker = node("node-b", &store, &worker_log);

    leader.start().await.unwrap();
    worker.start().await.unwrap();
    assert_eq!(leader.role(), Role::Leader);
    assert_eq!(worker.role(), Role::Worker);
    assert_eq!(leader.transport().active(), ActiveTransport::Primary);

    let mut changes = worker.subscriber().subscribe();
    let event = tokio::time::timeout(Duration::from_secs(30), changes.recv())
        .await
        .expect("no change propagated")
        .unwrap();
    assert_eq!(event.pair, CurrencyPair::new("USD", "KRW"));

    let cached = worker.cache().get_rate(&event.pair).await.unwrap().unwrap();
    assert!(cached.rate > 0.0);
    assert!(cached.timestamp >= event.record.timestamp);
    assert!(leader.cache().get_health("USD").await.unwrap().is_some());

    // Only the leader ingests.
    assert!(!leader_log.is_empty());
    assert!(worker_log.is_empty());

    leader.shutdown().await;
    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn worker_takes_over_after_leader_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let raw_log = Arc::new(MemoryTickLog::new());
    let first = node("node-a", &store, &raw_log);
    let second = node("node-b", &store, &raw_log);

    first.start().await.unwrap();
    second.start().await.unwrap();
    assert_eq!(first.role(), Role::Leader);

    first.shutdown().await;
    first.shutdown().await;
    assert_eq!(first.role(), Role::Worker);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(second.role(), Role::Leader);

    let mut changes = second.subscriber().subscribe();
    let before = raw_log.len();
    let event = tokio::time::timeout(Duration::from_secs(30), changes.recv())
        .await
        .expect("new leader did not publish")
        .unwrap();
    assert_eq!(event.pair.quote, "KRW");
    assert!(raw_log.len() > before);

    second.shutdown().await;
}
