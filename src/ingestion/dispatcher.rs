use std::sync::Arc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use crate::election::{LeaderLease, RoleState};
use crate::error::Error;
use crate::ingestion::processor::RateIngestionProcessor;
use crate::observability::metrics::TICKS_DROPPED;
use crate::types::pair::CurrencyPair;
use crate::types::tick::Tick;
use crate::utils::task_supervisor::{TaskHandle, TaskSupervisor};

type PairQueue = mpsc::Sender<(LeaderLease, Tick)>;

/// Fans ticks out to one sequential worker per pair.
///
/// Ticks for the same pair are ingested in arrival order; different pairs
/// proceed concurrently. Each tick is stamped with the lease current at
/// dispatch, so a demotion in flight is caught by the processor.
pub struct TickDispatcher {
    processor: Arc<RateIngestionProcessor>,
    role: Arc<RoleState>,
    supervisor: Arc<TaskSupervisor>,
    queue_capacity: usize,
    workers: DashMap<CurrencyPair, PairQueue>,
}

impl TickDispatcher {
    pub fn new(
        processor: Arc<RateIngestionProcessor>,
        role: Arc<RoleState>,
        supervisor: Arc<TaskSupervisor>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(TickDispatcher {
            processor,
            role,
            supervisor,
            queue_capacity: queue_capacity.max(1),
            workers: DashMap::new(),
        })
    }

    /// Consume the tick bus until it closes.
    pub fn start(self: &Arc<Self>, mut ticks: mpsc::Receiver<Tick>) -> TaskHandle {
        let this = Arc::clone(self);
        self.supervisor.spawn("tick-dispatcher", async move {
            while let Some(tick) = ticks.recv().await {
                this.dispatch(tick);
            }
            debug!("Tick bus closed, dispatcher exiting");
        })
    }

    pub fn dispatch(&self, tick: Tick) {
        let Some(lease) = self.role.lease() else {
            TICKS_DROPPED.inc();
            debug!(pair = %tick.pair, "Not leader, dropping tick");
            return;
        };

        let queue = self.queue_for(&tick.pair);
        match queue.try_send((lease, tick)) {
            Ok(()) => {}
            Err(TrySendError::Full((_, tick))) => {
                TICKS_DROPPED.inc();
                warn!(pair = %tick.pair, "Pair queue full, dropping tick");
            }
            Err(TrySendError::Closed((_, tick))) => {
                // Worker was cancelled; the next tick starts a fresh one.
                self.workers.remove(&tick.pair);
                TICKS_DROPPED.inc();
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn queue_for(&self, pair: &CurrencyPair) -> PairQueue {
        self.workers
            .entry(pair.clone())
            .or_insert_with(|| self.spawn_worker(pair))
            .clone()
    }

    fn spawn_worker(&self, pair: &CurrencyPair) -> PairQueue {
        let (tx, mut rx) = mpsc::channel::<(LeaderLease, Tick)>(self.queue_capacity);
        let processor = Arc::clone(&self.processor);

        self.supervisor.spawn(&format!("ingest-{}", pair), async move {
            while let Some((lease, tick)) = rx.recv().await {
                match processor.process_tick(&lease, &tick).await {
                    Ok(_) => {}
                    Err(Error::NotLeader) => {
                        debug!(pair = %tick.pair, lease_epoch = lease.epoch(), "Leadership lost before tick was ingested");
                    }
                    Err(e) => warn!(pair = %tick.pair, error = %e, "Tick rejected"),
                }
            }
        });
        tx
    }
}
