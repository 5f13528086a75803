use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;
use crate::api::ops::OpsState;
use crate::config::{AppConfig, RawLogConfig, StoreBackend, StoreConfig};
use crate::election::{LeaderElector, LeadershipHooks, Role, RoleState};
use crate::error::Result;
use crate::ingestion::{RateIngestionProcessor, ThresholdTable, TickDispatcher};
use crate::interfaces::change_consumer::{ChangeConsumer, LoggingChangeConsumer};
use crate::interfaces::market_calendar::{MarketCalendar, WeekdayCalendar};
use crate::interfaces::raw_tick_store::{JsonlTickLog, MemoryTickLog, RawTickStore};
use crate::price_infra::connectors::coinapi::CoinApiSource;
use crate::price_infra::connectors::simulated::SimulatedSource;
use crate::price_infra::connectors::TickSource;
use crate::price_infra::transport::TransportManager;
use crate::price_infra::{tick_bus, TickSender};
use crate::propagation::ChangePropagationSubscriber;
use crate::store::memory::MemoryStore;
use crate::store::rate_cache::RateCacheStore;
use crate::store::SharedStore;
use crate::types::ids::InstanceId;
use crate::types::tick::Tick;
use crate::utils::helper::lock;
use crate::utils::task_supervisor::TaskSupervisor;

/// Primary and secondary tick sources for one node.
pub type SourcePair = (Arc<dyn TickSource>, Arc<dyn TickSource>);

/// One relay process: election, transports, ingestion and propagation.
pub struct RelayNode {
    config: AppConfig,
    instance_id: InstanceId,
    role: Arc<RoleState>,
    supervisor: Arc<TaskSupervisor>,
    cache: RateCacheStore,
    transport: Arc<TransportManager>,
    elector: Arc<LeaderElector>,
    dispatcher: Arc<TickDispatcher>,
    subscriber: Arc<ChangePropagationSubscriber>,
    ticks: Mutex<Option<mpsc::Receiver<Tick>>>,
    shut_down: AtomicBool,
}

pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn SharedStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            let store = crate::store::redis::RedisStore::connect(&config.url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => Err(crate::error::Error::ConfigError(
            "store.backend = redis needs the redis-store feature".to_string(),
        )),
    }
}

pub async fn open_raw_log(config: &RawLogConfig) -> Result<Arc<dyn RawTickStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(JsonlTickLog::open(path).await?)),
        None => Ok(Arc::new(MemoryTickLog::new())),
    }
}

/// CoinAPI as primary, the simulator as fallback.
pub fn default_sources(config: &AppConfig, ticks: TickSender) -> SourcePair {
    let primary: Arc<dyn TickSource> = Arc::new(CoinApiSource::new(config.upstream.clone(), ticks.clone()));
    let secondary: Arc<dyn TickSource> =
        Arc::new(SimulatedSource::new(&config.upstream, config.simulator.clone(), ticks));
    (primary, secondary)
}

impl RelayNode {
    /// Build a node from configuration alone.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = connect_store(&config.store).await?;
        let raw_log = open_raw_log(&config.raw_log).await?;
        let consumers: Vec<Arc<dyn ChangeConsumer>> = vec![Arc::new(LoggingChangeConsumer)];
        Ok(Self::assemble(config, store, raw_log, consumers, default_sources))
    }

    /// Wire a node around an existing store and caller-chosen sources.
    pub fn assemble<F>(
        config: AppConfig,
        store: Arc<dyn SharedStore>,
        raw_log: Arc<dyn RawTickStore>,
        consumers: Vec<Arc<dyn ChangeConsumer>>,
        sources: F,
    ) -> Self
    where
        F: FnOnce(&AppConfig, TickSender) -> SourcePair,
    {
        let instance_id = config.node.instance_id.as_deref()
            .map(InstanceId::from_string)
            .unwrap_or_default();
        let role = Arc::new(RoleState::new());
        let supervisor = Arc::new(TaskSupervisor::new());
        let calendar: Arc<dyn MarketCalendar> = Arc::new(WeekdayCalendar::new(&config.calendar));
        let cache = RateCacheStore::new(store.clone(), &config.node.namespace);

        let (sender, ticks) = tick_bus(config.ingestion.channel_capacity);
        let (primary, secondary) = sources(&config, sender);
        let transport = TransportManager::new(
            primary,
            secondary,
            config.transport.clone(),
            supervisor.clone(),
        );

        let processor = Arc::new(RateIngestionProcessor::new(
            cache.clone(),
            raw_log,
            calendar.clone(),
            ThresholdTable::new(&config.ingestion),
            role.clone(),
        ));
        let dispatcher = TickDispatcher::new(
            processor,
            role.clone(),
            supervisor.clone(),
            config.ingestion.pair_queue_capacity,
        );
        let subscriber = ChangePropagationSubscriber::new(cache.clone(), consumers);

        let hooks: Arc<dyn LeadershipHooks> = transport.clone();
        let elector = LeaderElector::new(
            instance_id.clone(),
            config.election.clone(),
            store,
            role.clone(),
            calendar,
            hooks,
            supervisor.clone(),
        );

        RelayNode {
            config,
            instance_id,
            role,
            supervisor,
            cache,
            transport,
            elector,
            dispatcher,
            subscriber,
            ticks: Mutex::new(Some(ticks)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to changes, start ingesting and run the first election.
    pub async fn start(&self) -> Result<()> {
        self.subscriber.start(&self.supervisor).await?;
        let ticks = lock(&self.ticks).take();
        if let Some(ticks) = ticks {
            self.dispatcher.start(ticks);
        }

        info!(instance_id = %self.instance_id, "Relay node starting");
        self.elector.elect().await;
        info!(instance_id = %self.instance_id, role = ?self.role(), "Initial election finished");
        Ok(())
    }

    /// Release the lock, stop transports and cancel every task. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(instance_id = %self.instance_id, "Relay node shutting down");
        self.elector.shutdown().await;
        self.transport.disconnect().await;
        self.supervisor.shutdown_all();
    }

    pub fn ops_state(&self) -> Arc<OpsState> {
        Arc::new(OpsState {
            instance_id: self.instance_id.clone(),
            role: self.role.clone(),
            transport: self.transport.clone(),
            cache: self.cache.clone(),
            supervisor: self.supervisor.clone(),
            bases: vec![self.config.upstream.base_currency.to_uppercase()],
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &RateCacheStore {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    pub fn subscriber(&self) -> &Arc<ChangePropagationSubscriber> {
        &self.subscriber
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }
}
