use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    Router,
    routing::get,
    extract::{State, Json},
    http::{header, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::election::{Role, RoleState};
use crate::observability::metrics::gather_text;
use crate::price_infra::transport::{ActiveTransport, TransportManager};
use crate::store::rate_cache::RateCacheStore;
use crate::types::ids::InstanceId;
use crate::utils::task_supervisor::TaskSupervisor;

pub struct OpsState {
    pub instance_id: InstanceId,
    pub role: Arc<RoleState>,
    pub transport: Arc<TransportManager>,
    pub cache: RateCacheStore,
    pub supervisor: Arc<TaskSupervisor>,
    pub bases: Vec<String>,
}

pub fn create_router(state: Arc<OpsState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub instance_id: String,
    pub namespace: String,
    pub role: Role,
    pub transport: ActiveTransport,
    pub transport_healthy: bool,
    /// False once any background task has exited on its own.
    pub tasks_healthy: bool,
    pub active_tasks: usize,
    /// Last ingest time per base currency; `None` if never seen or unreadable.
    pub freshness: BTreeMap<String, Option<DateTime<Utc>>>,
}

/// 503 when a background task died, or when this node leads without a
/// working transport.
async fn health(State(state): State<Arc<OpsState>>) -> (StatusCode, Json<HealthReport>) {
    let role = state.role.role();
    let transport_healthy = state.transport.is_healthy();
    let tasks_healthy = state.supervisor.check_health().is_ok();

    let mut freshness = BTreeMap::new();
    for base in &state.bases {
        let marker = state.cache.get_health(base).await.ok().flatten();
        freshness.insert(base.clone(), marker);
    }

    let status = if !tasks_healthy || (role == Role::Leader && !transport_healthy) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        instance_id: state.instance_id.to_string(),
        namespace: state.cache.namespace().to_string(),
        role,
        transport: state.transport.active(),
        transport_healthy,
        tasks_healthy,
        active_tasks: state.supervisor.active_task_count(),
        freshness,
    };
    (status, Json(report))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_text(),
    )
}
