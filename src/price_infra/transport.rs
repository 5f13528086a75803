use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use crate::config::TransportConfig;
use crate::election::LeadershipHooks;
use crate::error::{Error, Result};
use crate::observability::metrics::TRANSPORT_FAILOVERS;
use crate::price_infra::connectors::TickSource;
use crate::utils::helper::lock;
use crate::utils::task_supervisor::{TaskHandle, TaskSupervisor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTransport {
    Primary,
    Secondary,
    /// Both sources failed; nothing runs until the next `connect`.
    Exhausted,
}

/// Owns the primary and secondary tick sources and fails over between them.
///
/// Failover is one-way within a connection: primary to secondary once, then
/// exhausted. A fresh `connect` starts again from the primary.
///
/// Every source connect is bounded by `connect_timeout`, and `connect` does
/// not hold the health lock while the source dials, so a stuck primary is
/// still failed over by the poll.
pub struct TransportManager {
    primary: Arc<dyn TickSource>,
    secondary: Arc<dyn TickSource>,
    config: TransportConfig,
    supervisor: Arc<TaskSupervisor>,
    active: Mutex<ActiveTransport>,
    poll: Mutex<Option<TaskHandle>>,
    /// Serialises state changes of connect, disconnect and health checks.
    health_lock: tokio::sync::Mutex<()>,
    /// Bumped by every connect and disconnect.
    session: AtomicU64,
    this: Weak<TransportManager>,
}

impl TransportManager {
    pub fn new(
        primary: Arc<dyn TickSource>,
        secondary: Arc<dyn TickSource>,
        config: TransportConfig,
        supervisor: Arc<TaskSupervisor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| TransportManager {
            primary,
            secondary,
            config,
            supervisor,
            active: Mutex::new(ActiveTransport::Primary),
            poll: Mutex::new(None),
            health_lock: tokio::sync::Mutex::new(()),
            session: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub fn active(&self) -> ActiveTransport {
        *lock(&self.active)
    }

    fn source(&self, which: ActiveTransport) -> Option<&Arc<dyn TickSource>> {
        match which {
            ActiveTransport::Primary => Some(&self.primary),
            ActiveTransport::Secondary => Some(&self.secondary),
            ActiveTransport::Exhausted => None,
        }
    }

    /// Connect the active source and start the health poll.
    pub async fn connect(&self) -> Result<()> {
        let (which, session) = {
            let _guard = self.health_lock.lock().await;
            let which = {
                let mut active = lock(&self.active);
                if *active == ActiveTransport::Exhausted {
                    *active = ActiveTransport::Primary;
                }
                *active
            };
            self.start_poll();
            (which, self.session.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let Some(source) = self.source(which) else {
            return Ok(());
        };
        info!(source_id = source.source_id(), "Connecting transport");
        let result = self.connect_source(source).await;

        let _guard = self.health_lock.lock().await;
        if self.session.load(Ordering::SeqCst) != session || self.active() != which {
            // A failover or disconnect ran while we were dialling.
            debug!(source_id = source.source_id(), "Transport moved on during connect, closing source");
            source.disconnect().await;
            return result;
        }
        result.inspect_err(|e| {
            // The poll will notice and fail over.
            warn!(source_id = source.source_id(), error = %e, "Transport connect failed");
        })
    }

    async fn connect_source(&self, source: &Arc<dyn TickSource>) -> Result<()> {
        let limit = self.config.connect_timeout();
        match timeout(limit, source.connect()).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout(limit)),
        }
    }

    /// Socket open and a heartbeat inside the staleness window.
    pub fn is_healthy(&self) -> bool {
        let Some(source) = self.source(self.active()) else {
            return false;
        };
        let window = self.config.staleness_window();
        source.is_socket_open()
            && source.last_heartbeat().is_some_and(|beat| beat.elapsed() <= window)
    }

    /// One health poll round.
    pub async fn check_health(&self) {
        let _guard = self.health_lock.lock().await;

        if self.is_healthy() {
            debug!(active = ?self.active(), "Transport healthy");
            return;
        }

        match self.active() {
            ActiveTransport::Primary => {
                warn!(source_id = self.primary.source_id(), "Primary transport unhealthy, failing over");
                self.primary.disconnect().await;
                *lock(&self.active) = ActiveTransport::Secondary;
                TRANSPORT_FAILOVERS.inc();

                if let Err(e) = self.connect_source(&self.secondary).await {
                    warn!(source_id = self.secondary.source_id(), error = %e, "Secondary transport connect failed");
                }
            }
            ActiveTransport::Secondary => {
                error!("Secondary transport unhealthy, no transport left");
                self.primary.disconnect().await;
                self.secondary.disconnect().await;
                *lock(&self.active) = ActiveTransport::Exhausted;
                self.stop_poll();
            }
            ActiveTransport::Exhausted => {}
        }
    }

    /// Stop polling and close the active source. Safe to repeat.
    pub async fn disconnect(&self) {
        let _guard = self.health_lock.lock().await;
        self.session.fetch_add(1, Ordering::SeqCst);
        self.stop_poll();

        let which = std::mem::replace(&mut *lock(&self.active), ActiveTransport::Primary);
        if let Some(source) = self.source(which) {
            source.disconnect().await;
            info!(source_id = source.source_id(), "Transport disconnected");
        }
    }

    fn start_poll(&self) {
        let weak = self.this.clone();
        let handle = self.supervisor.spawn_every(
            "transport-health-poll",
            self.config.health_poll_interval(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.check_health().await;
                    }
                }
            },
        );

        if let Some(previous) = lock(&self.poll).replace(handle) {
            previous.cancel();
        }
    }

    fn stop_poll(&self) {
        if let Some(poll) = lock(&self.poll).take() {
            poll.cancel();
        }
    }
}

#[async_trait]
impl LeadershipHooks for TransportManager {
    async fn on_elected(&self) {
        if let Err(e) = self.connect().await {
            warn!(error = %e, "Transport did not come up on election");
        }
    }

    async fn on_demoted(&self) {
        self.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use mockall::Sequence;
    use tokio::time::Instant;
    use crate::price_infra::connectors::MockTickSource;

    /// A source whose handshake never completes.
    struct StalledSource;

    #[async_trait]
    impl TickSource for StalledSource {
        async fn connect(&self) -> Result<()> {
            std::future::pending().await
        }

        async fn disconnect(&self) {}

        fn is_socket_open(&self) -> bool {
            false
        }

        fn last_heartbeat(&self) -> Option<Instant> {
            None
        }

        fn source_id(&self) -> &'static str {
            "stalled"
        }
    }

    fn healthy(mock: &mut MockTickSource) {
        mock.expect_is_socket_open().return_const(true);
        mock.expect_last_heartbeat().returning(|| Some(Instant::now()));
    }

    fn unhealthy(mock: &mut MockTickSource) {
        mock.expect_is_socket_open().return_const(false);
        mock.expect_last_heartbeat().returning(|| None);
    }

    fn named(mut mock: MockTickSource, id: &'static str) -> Arc<dyn TickSource> {
        mock.expect_source_id().return_const(id);
        Arc::new(mock)
    }

    fn manager(primary: MockTickSource, secondary: MockTickSource) -> Arc<TransportManager> {
        TransportManager::new(
            named(primary, "primary"),
            named(secondary, "secondary"),
            TransportConfig::default(),
            Arc::new(TaskSupervisor::new()),
        )
    }

    #[tokio::test]
    async fn connect_uses_primary_only() {
        let mut primary = MockTickSource::new();
        primary.expect_connect().times(1).returning(|| Ok(()));
        primary.expect_disconnect().times(1).returning(|| ());
        healthy(&mut primary);
        let mut secondary = MockTickSource::new();
        secondary.expect_connect().times(0);

        let transport = manager(primary, secondary);
        transport.connect().await.unwrap();
        assert_eq!(transport.active(), ActiveTransport::Primary);
        assert!(transport.is_healthy());

        transport.check_health().await;
        assert_eq!(transport.active(), ActiveTransport::Primary);
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn unhealthy_primary_fails_over_exactly_once() {
        let mut seq = Sequence::new();
        let mut primary = MockTickSource::new();
        let mut secondary = MockTickSource::new();
        primary.expect_connect().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        primary.expect_disconnect().times(1).in_sequence(&mut seq).returning(|| ());
        secondary.expect_connect().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        unhealthy(&mut primary);
        healthy(&mut secondary);
        secondary.expect_disconnect().returning(|| ());

        let transport = manager(primary, secondary);
        transport.connect().await.unwrap();

        transport.check_health().await;
        assert_eq!(transport.active(), ActiveTransport::Secondary);

        transport.check_health().await;
        assert_eq!(transport.active(), ActiveTransport::Secondary);
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn unhealthy_secondary_exhausts_transports() {
        let mut primary = MockTickSource::new();
        let mut secondary = MockTickSource::new();
        primary.expect_connect().times(1).returning(|| Ok(()));
        primary.expect_disconnect().times(2).returning(|| ());
        secondary.expect_connect().times(1).returning(|| Ok(()));
        secondary.expect_disconnect().times(1).returning(|| ());
        unhealthy(&mut primary);
        unhealthy(&mut secondary);

        let transport = manager(primary, secondary);
        transport.connect().await.unwrap();
        transport.check_health().await;
        transport.check_health().await;

        assert_eq!(transport.active(), ActiveTransport::Exhausted);
        assert!(!transport.is_healthy());
        assert!(lock(&transport.poll).is_none());

        // Nothing left to fail over to.
        transport.check_health().await;
        assert_eq!(transport.active(), ActiveTransport::Exhausted);
    }

    #[tokio::test]
    async fn repeated_disconnect_is_safe() {
        let mut primary = MockTickSource::new();
        primary.expect_connect().times(1).returning(|| Ok(()));
        primary.expect_disconnect().returning(|| ());
        healthy(&mut primary);
        let secondary = MockTickSource::new();

        let transport = manager(primary, secondary);
        transport.connect().await.unwrap();
        transport.disconnect().await;
        transport.disconnect().await;

        assert_eq!(transport.active(), ActiveTransport::Primary);
        assert!(lock(&transport.poll).is_none());
    }

    #[tokio::test]
    async fn stale_heartbeat_counts_as_unhealthy() {
        let mut primary = MockTickSource::new();
        primary.expect_is_socket_open().return_const(true);
        primary.expect_last_heartbeat()
            .returning(|| Instant::now().checked_sub(Duration::from_secs(120)));
        let transport = manager(primary, MockTickSource::new());

        assert!(!transport.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn health_poll_drives_failover() {
        let mut primary = MockTickSource::new();
        let mut secondary = MockTickSource::new();
        primary.expect_connect().times(1).returning(|| Ok(()));
        primary.expect_disconnect().times(1).returning(|| ());
        secondary.expect_connect().times(1).returning(|| Ok(()));
        secondary.expect_disconnect().returning(|| ());
        unhealthy(&mut primary);
        healthy(&mut secondary);

        let transport = manager(primary, secondary);
        transport.connect().await.unwrap();
        assert_eq!(transport.active(), ActiveTransport::Primary);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(transport.active(), ActiveTransport::Secondary);
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn leadership_hooks_drive_connection() {
        let mut primary = MockTickSource::new();
        primary.expect_connect().times(1).returning(|| Ok(()));
        primary.expect_disconnect().times(1).returning(|| ());
        healthy(&mut primary);

        let transport = manager(primary, MockTickSource::new());
        let hooks: Arc<dyn LeadershipHooks> = transport.clone();
        hooks.on_elected().await;
        assert!(lock(&transport.poll).is_some());
        hooks.on_demoted().await;
        assert!(lock(&transport.poll).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_primary_connect_still_fails_over() {
        let mut secondary = MockTickSource::new();
        secondary.expect_connect().times(1).returning(|| Ok(()));
        secondary.expect_disconnect().returning(|| ());
        healthy(&mut secondary);

        let transport = TransportManager::new(
            Arc::new(StalledSource),
            named(secondary, "secondary"),
            TransportConfig::default(),
            Arc::new(TaskSupervisor::new()),
        );
        let connecting = tokio::spawn({
            let transport = transport.clone();
            async move { transport.connect().await }
        });

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.active(), ActiveTransport::Secondary);
        assert!(transport.is_healthy());

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectTimeout(_))));
        transport.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_does_not_wait_for_a_stalled_connect() {
        let transport = TransportManager::new(
            Arc::new(StalledSource),
            named(MockTickSource::new(), "secondary"),
            TransportConfig::default(),
            Arc::new(TaskSupervisor::new()),
        );
        let connecting = tokio::spawn({
            let transport = transport.clone();
            async move { transport.connect().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        tokio::time::timeout(Duration::from_secs(1), transport.disconnect())
            .await
            .expect("disconnect blocked behind connect");
        assert!(lock(&transport.poll).is_none());
        assert!(connecting.await.unwrap().is_err());
        assert_eq!(transport.active(), ActiveTransport::Primary);
    }
}
