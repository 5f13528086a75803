use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn, Instrument};
use crate::config::ElectionConfig;
use crate::election::role::{Role, RoleState};
use crate::interfaces::market_calendar::MarketCalendar;
use crate::observability::metrics::{ELECTIONS_WON, IS_LEADER};
use crate::observability::tracing::election_span;
use crate::store::SharedStore;
use crate::types::ids::InstanceId;
use crate::utils::helper::lock;
use crate::utils::task_supervisor::{TaskHandle, TaskSupervisor};

/// Reactions to leadership changes.
///
/// Called after the election round that caused them has released its lock,
/// so a slow hook never stalls renewal, re-election or shutdown.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadershipHooks: Send + Sync {
    async fn on_elected(&self);
    async fn on_demoted(&self);
}

/// What a finished round owes the hooks.
enum Transition {
    Elected { epoch: u64 },
    Demoted,
    Unchanged,
}

#[derive(Default)]
struct Timers {
    heartbeat: Option<TaskHandle>,
    watcher: Option<TaskHandle>,
}

/// Keeps at most one relay in the cluster holding the leader lock.
///
/// The lock is a TTL'd key written with set-if-absent. The leader renews it
/// every `renew_ratio * ttl`; workers poll for the key to disappear and then
/// run a fresh election. A renewal that fails for any reason triggers a full
/// election instead of assuming the lock is still ours, and a store that
/// cannot be reached makes this node a worker.
pub struct LeaderElector {
    instance_id: InstanceId,
    config: ElectionConfig,
    store: Arc<dyn SharedStore>,
    role: Arc<RoleState>,
    calendar: Arc<dyn MarketCalendar>,
    hooks: Arc<dyn LeadershipHooks>,
    supervisor: Arc<TaskSupervisor>,
    timers: Mutex<Timers>,
    election_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

impl LeaderElector {
    pub fn new(
        instance_id: InstanceId,
        config: ElectionConfig,
        store: Arc<dyn SharedStore>,
        role: Arc<RoleState>,
        calendar: Arc<dyn MarketCalendar>,
        hooks: Arc<dyn LeadershipHooks>,
        supervisor: Arc<TaskSupervisor>,
    ) -> Arc<Self> {
        Arc::new(LeaderElector {
            instance_id,
            config,
            store,
            role,
            calendar,
            hooks,
            supervisor,
            timers: Mutex::new(Timers::default()),
            election_lock: tokio::sync::Mutex::new(()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    /// Run one election round. Rounds within a process are serialised.
    ///
    /// Returns a boxed `'static` future so timers can spawn it.
    pub fn elect(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        let span = election_span(this.instance_id.as_str());
        async move { this.run_election().await }
            .instrument(span)
            .boxed()
    }

    async fn run_election(self: &Arc<Self>) {
        let transition = self.decide().await;
        self.notify(transition).await;
    }

    async fn decide(self: &Arc<Self>) -> Transition {
        let _guard = self.election_lock.lock().await;
        if self.shut_down.load(Ordering::SeqCst) {
            return Transition::Unchanged;
        }

        if !self.calendar.is_market_open(Utc::now()) {
            debug!("Market closed, not contending for leadership");
            return self.become_worker();
        }

        let acquired = self.store
            .set_if_absent(&self.config.lock_key, self.instance_id.as_str(), self.config.ttl())
            .await;

        match acquired {
            Ok(true) => self.become_leader(),
            Ok(false) => {
                debug!(lock_key = %self.config.lock_key, "Leader lock held by another instance");
                self.become_worker()
            }
            Err(e) => {
                warn!(error = %e, "Shared store unavailable during election, staying worker");
                self.become_worker()
            }
        }
    }

    async fn notify(&self, transition: Transition) {
        match transition {
            Transition::Elected { epoch } => {
                // A demotion that slipped in first has already been reported.
                if self.role.is_leader() && self.role.epoch() == epoch {
                    self.hooks.on_elected().await;
                } else {
                    debug!(epoch, current_epoch = self.role.epoch(), "Leadership ended before elected hook ran");
                }
            }
            Transition::Demoted => self.hooks.on_demoted().await,
            Transition::Unchanged => {}
        }
    }

    fn become_leader(self: &Arc<Self>) -> Transition {
        let was_leader = self.role.is_leader();
        let epoch = self.role.promote();
        ELECTIONS_WON.inc();
        IS_LEADER.set(1);

        {
            let mut timers = lock(&self.timers);
            if let Some(watcher) = timers.watcher.take() {
                watcher.cancel();
            }
            if let Some(heartbeat) = timers.heartbeat.take() {
                heartbeat.cancel();
            }
            timers.heartbeat = Some(self.start_heartbeat());
        }

        info!(epoch, ttl_secs = self.config.ttl_secs, "Acquired leader lock");
        if was_leader {
            Transition::Unchanged
        } else {
            Transition::Elected { epoch }
        }
    }

    fn become_worker(self: &Arc<Self>) -> Transition {
        let was_leader = self.role.demote();
        IS_LEADER.set(0);

        {
            let mut timers = lock(&self.timers);
            if let Some(heartbeat) = timers.heartbeat.take() {
                heartbeat.cancel();
            }
            let watching = timers.watcher.as_ref().is_some_and(|w| w.is_active());
            if !watching {
                timers.watcher = Some(self.start_watcher());
            }
        }

        if was_leader {
            warn!(epoch = self.role.epoch(), "Demoted to worker");
            Transition::Demoted
        } else {
            Transition::Unchanged
        }
    }

    fn start_heartbeat(self: &Arc<Self>) -> TaskHandle {
        let weak = Arc::downgrade(self);
        self.supervisor.spawn_every("leader-heartbeat", self.config.renew_interval(), move || {
            let weak: Weak<Self> = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.renew_lock().await;
                }
            }
        })
    }

    fn start_watcher(self: &Arc<Self>) -> TaskHandle {
        let weak = Arc::downgrade(self);
        self.supervisor.spawn_every("leader-watcher", self.config.watch_interval(), move || {
            let weak: Weak<Self> = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.watch_lock().await;
                }
            }
        })
    }

    async fn renew_lock(self: &Arc<Self>) {
        let renewed = self.store
            .renew(&self.config.lock_key, self.instance_id.as_str(), self.config.ttl())
            .await;

        match renewed {
            Ok(true) => debug!(instance_id = %self.instance_id, "Renewed leader lock"),
            Ok(false) => {
                warn!(instance_id = %self.instance_id, "Leader lock no longer held, re-electing");
                tokio::spawn(self.elect());
            }
            Err(e) => {
                warn!(instance_id = %self.instance_id, error = %e, "Leader lock renewal failed, re-electing");
                tokio::spawn(self.elect());
            }
        }
    }

    async fn watch_lock(self: &Arc<Self>) {
        match self.store.get(&self.config.lock_key).await {
            Ok(None) => {
                info!(instance_id = %self.instance_id, "Leader lock vacant, running election");
                tokio::spawn(self.elect());
            }
            Ok(Some(holder)) => debug!(holder = %holder, "Leader lock held"),
            Err(e) => warn!(error = %e, "Could not inspect leader lock"),
        }
    }

    /// Cancel all timers and release the lock if leading. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Stop renewing before waiting out any round in flight.
        self.cancel_timers();

        let released = {
            let _guard = self.election_lock.lock().await;
            // A round that finished while we waited may have started a timer.
            self.cancel_timers();

            let was_leader = self.role.demote();
            if was_leader {
                IS_LEADER.set(0);
                match self.store.delete_if_equals(&self.config.lock_key, self.instance_id.as_str()).await {
                    Ok(true) => info!(instance_id = %self.instance_id, "Released leader lock"),
                    Ok(false) => warn!(instance_id = %self.instance_id, "Leader lock already gone at shutdown"),
                    Err(e) => warn!(instance_id = %self.instance_id, error = %e, "Failed to release leader lock"),
                }
            }
            was_leader
        };

        if released {
            self.hooks.on_demoted().await;
        }
    }

    fn cancel_timers(&self) {
        let mut timers = lock(&self.timers);
        if let Some(heartbeat) = timers.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(watcher) = timers.watcher.take() {
            watcher.cancel();
        }
    }
}
