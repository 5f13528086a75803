use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use rate_relay::config::ElectionConfig;
use rate_relay::election::{LeaderElector, LeadershipHooks, Role, RoleState};
use rate_relay::interfaces::market_calendar::WeekdayCalendar;
use rate_relay::store::memory::MemoryStore;
use rate_relay::store::{MessageStream, SharedStore};
use rate_relay::types::ids::InstanceId;
use rate_relay::utils::task_supervisor::TaskSupervisor;
use rate_relay::{Error, Result};

const LOCK_KEY: &str = "rates:leader-lock";

#[derive(Default)]
struct CountingHooks {
    elected: AtomicUsize,
    demoted: AtomicUsize,
}

#[async_trait]
impl LeadershipHooks for CountingHooks {
    async fn on_elected(&self) {
        self.elected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_demoted(&self) {
        self.demoted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared store seen through one node's network link, which can be cut.
struct PartitionedStore {
    inner: Arc<MemoryStore>,
    cut: AtomicBool,
}

impl PartitionedStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        PartitionedStore { inner, cut: AtomicBool::new(false) }
    }

    fn check(&self) -> Result<()> {
        if self.cut.load(Ordering::SeqCst) {
            return Err(Error::StoreError("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for PartitionedStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn renew(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.renew(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete_if_equals(key, value).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.check()?;
        self.inner.hset(key, fields).await
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        self.check()?;
        self.inner.hmget(key, fields).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.check()?;
        self.inner.publish(channel, payload).await
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream> {
        self.check()?;
        self.inner.psubscribe(pattern).await
    }
}

struct Node {
    elector: Arc<LeaderElector>,
    hooks: Arc<CountingHooks>,
    link: Arc<PartitionedStore>,
}

fn cluster(size: usize, shared: &Arc<MemoryStore>) -> Vec<Node> {
    (0..size)
        .map(|i| {
            let hooks = Arc::new(CountingHooks::default());
            let link = Arc::new(PartitionedStore::new(shared.clone()));
            let elector = LeaderElector::new(
                InstanceId::from_string(&format!("node-{}", i)),
                ElectionConfig::default(),
                link.clone(),
                Arc::new(RoleState::new()),
                Arc::new(WeekdayCalendar::always_open()),
                hooks.clone(),
                Arc::new(TaskSupervisor::new()),
            );
            Node { elector, hooks, link }
        })
        .collect()
}

fn leaders(nodes: &[Node]) -> Vec<usize> {
    nodes.iter()
        .enumerate()
        .filter(|(_, n)| n.elector.role() == Role::Leader)
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn concurrent_elections_produce_one_leader() {
    let shared = Arc::new(MemoryStore::new());
    let nodes = cluster(5, &shared);

    join_all(nodes.iter().map(|n| n.elector.elect())).await;

    let leading = leaders(&nodes);
    assert_eq!(leading.len(), 1);
    let holder = shared.get(LOCK_KEY).await.unwrap();
    assert_eq!(holder, Some(format!("node-{}", leading[0])));

    // Renewals and watchers keep it that way.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(leaders(&nodes), leading);
    assert_eq!(nodes[leading[0]].hooks.elected.load(Ordering::SeqCst), 1);

    for node in &nodes {
        node.elector.shutdown().await;
    }
    assert_eq!(shared.get(LOCK_KEY).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn partitioned_leader_steps_down_and_one_worker_takes_over() {
    let shared = Arc::new(MemoryStore::new());
    let nodes = cluster(3, &shared);

    nodes[0].elector.elect().await;
    for node in &nodes[1..] {
        node.elector.elect().await;
    }
    assert_eq!(leaders(&nodes), vec![0]);

    nodes[0].link.cut.store(true, Ordering::SeqCst);

    // Renewal fails at 45s, the key lapses at 60s, a watcher picks it up.
    tokio::time::sleep(Duration::from_secs(80)).await;

    assert_eq!(nodes[0].elector.role(), Role::Worker);
    assert_eq!(nodes[0].hooks.demoted.load(Ordering::SeqCst), 1);

    let leading = leaders(&nodes);
    assert_eq!(leading.len(), 1);
    assert_ne!(leading[0], 0);
    let holder = shared.get(LOCK_KEY).await.unwrap();
    assert_eq!(holder, Some(format!("node-{}", leading[0])));

    // The old leader rejoins as a worker once its link heals.
    nodes[0].link.cut.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(leaders(&nodes), leading);

    for node in &nodes {
        node.elector.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn released_lock_is_claimed_by_a_watcher() {
    let shared = Arc::new(MemoryStore::new());
    let nodes = cluster(2, &shared);

    nodes[0].elector.elect().await;
    nodes[1].elector.elect().await;
    assert_eq!(leaders(&nodes), vec![0]);

    nodes[0].elector.shutdown().await;
    assert_eq!(shared.get(LOCK_KEY).await.unwrap(), None);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(leaders(&nodes), vec![1]);
    assert_eq!(nodes[1].hooks.elected.load(Ordering::SeqCst), 1);
    nodes[1].elector.shutdown().await;
}
