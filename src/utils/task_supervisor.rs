use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use crate::error::{Error, Result};
use crate::utils::helper::lock;
use tracing::{debug, error, info};

/// Cancellable handle to a supervised background task.
///
/// Clones share the same task. `cancel` is idempotent: the first call aborts
/// the task, later calls do nothing.
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskHandle {
    fn new(name: &str, join: JoinHandle<()>) -> Self {
        TaskHandle {
            name: Arc::from(name),
            join: Arc::new(Mutex::new(Some(join))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        if let Some(join) = lock(&self.join).take() {
            join.abort();
            debug!(task = %self.name, "Cancelled background task");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.join).is_none()
    }

    /// True while the task is neither cancelled nor finished.
    pub fn is_active(&self) -> bool {
        lock(&self.join).as_ref().is_some_and(|join| !join.is_finished())
    }

    fn finished_unexpectedly(&self) -> bool {
        lock(&self.join).as_ref().is_some_and(|join| join.is_finished())
    }
}

/// Task Supervisor - spawns, tracks and cancels background tasks
///
/// Long-lived loops and repeating timers are spawned through the supervisor
/// so that shutdown can cancel every one of them, and so that a task dying
/// on its own can be detected by `check_health`.
#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Mutex<Vec<TaskHandle>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a new background task and register it for monitoring
    pub fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = TaskHandle::new(name, tokio::spawn(future));
        debug!(task = %name, "Spawned background task");
        self.track(handle.clone());
        handle
    }

    /// Run `tick` every `period`, first firing one period from now.
    ///
    /// Missed ticks are delayed rather than bursted, so a slow body never
    /// runs back to back.
    pub fn spawn_every<F, Fut>(&self, name: &str, period: Duration, mut tick: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick().await;
            }
        })
    }

    fn track(&self, handle: TaskHandle) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_cancelled());
        tasks.push(handle);
    }

    /// Returns error if any registered task has terminated on its own.
    ///
    /// A dead task keeps being reported until it is cancelled or the
    /// supervisor shuts down.
    pub fn check_health(&self) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        let failed: Vec<String> = tasks.iter()
            .filter(|t| t.finished_unexpectedly())
            .map(|t| t.name().to_string())
            .collect();

        tasks.retain(|t| t.is_active() || t.finished_unexpectedly());

        if !failed.is_empty() {
            let error_msg = format!("Tasks terminated unexpectedly: {:?}", failed);
            error!("{}", error_msg);
            return Err(Error::TaskError(error_msg));
        }

        Ok(())
    }

    /// Get count of active tasks
    pub fn active_task_count(&self) -> usize {
        lock(&self.tasks).iter().filter(|t| t.is_active()).count()
    }

    /// Cancel every tracked task
    pub fn shutdown_all(&self) {
        let tasks: Vec<TaskHandle> = lock(&self.tasks).drain(..).collect();
        info!("Shutting down {} background tasks", tasks.len());

        for task in tasks {
            task.cancel();
        }
    }
}
