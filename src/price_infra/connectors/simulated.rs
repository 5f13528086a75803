use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;
use crate::config::upstream::{SimulatorConfig, UpstreamConfig};
use crate::error::Result;
use crate::price_infra::connectors::TickSource;
use crate::price_infra::TickSender;
use crate::types::pair::CurrencyPair;
use crate::types::rate::round_rate;
use crate::types::tick::Tick;
use crate::utils::helper::lock;

const SOURCE_ID: &str = "simulated";

/// Fallback source producing a bounded random walk per pair.
pub struct SimulatedSource {
    state: Arc<SimState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct SimState {
    config: SimulatorConfig,
    pairs: Vec<CurrencyPair>,
    ticks: TickSender,
    running: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl SimulatedSource {
    pub fn new(upstream: &UpstreamConfig, config: SimulatorConfig, ticks: TickSender) -> Self {
        SimulatedSource {
            state: Arc::new(SimState {
                pairs: upstream.pairs(),
                config,
                ticks,
                running: AtomicBool::new(false),
                last_heartbeat: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }
}

impl SimState {
    async fn run(self: Arc<Self>) {
        let mut rng = StdRng::from_entropy();
        let mut rates: Vec<f64> = self.pairs.iter()
            .map(|pair| self.config.seed_rate(&pair.quote))
            .collect();

        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let now = Utc::now();
            let step = self.config.volatility_pct.abs() / 100.0;

            for (pair, rate) in self.pairs.iter().zip(rates.iter_mut()) {
                let drift = if step > 0.0 { rng.gen_range(-step..=step) } else { 0.0 };
                let next = round_rate(*rate * (1.0 + drift));
                if next > 0.0 {
                    *rate = next;
                }
                self.ticks.emit(Tick::new(pair.clone(), *rate, now));
            }
            *lock(&self.last_heartbeat) = Some(Instant::now());
        }
    }
}

#[async_trait]
impl TickSource for SimulatedSource {
    async fn connect(&self) -> Result<()> {
        let mut task = lock(&self.task);
        if let Some(running) = task.take() {
            running.abort();
        }
        self.state.running.store(true, Ordering::SeqCst);
        *lock(&self.state.last_heartbeat) = Some(Instant::now());
        *task = Some(tokio::spawn(Arc::clone(&self.state).run()));

        info!(source_id = SOURCE_ID, pairs = self.state.pairs.len(), "Simulated feed started");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(running) = lock(&self.task).take() {
            running.abort();
            info!(source_id = SOURCE_ID, "Simulated feed stopped");
        }
        self.state.running.store(false, Ordering::SeqCst);
    }

    fn is_socket_open(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn last_heartbeat(&self) -> Option<Instant> {
        *lock(&self.state.last_heartbeat)
    }

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }
}
