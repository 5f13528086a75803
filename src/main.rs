use rate_relay::api::ops::create_router;
use rate_relay::app::RelayNode;
use rate_relay::config::AppConfig;
use rate_relay::observability::metrics::register_metrics;
use rate_relay::observability::tracing::init_tracing;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env = std::env::var("RATE_RELAY_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env)?;

    init_tracing(&config.log);
    register_metrics();
    tracing::info!(env = %env, "Starting rate relay");

    let node = RelayNode::build(config.clone()).await?;
    node.start().await?;

    // Ops endpoints
    let listener = TcpListener::bind(&config.api.bind_addr).await?;
    tracing::info!("Ops API listening on {}", config.api.bind_addr);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let router = create_router(node.ops_state());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");

    node.shutdown().await;
    let _ = stop_tx.send(true);
    match server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Ops server exited with error"),
        Err(e) => tracing::warn!(error = %e, "Ops server task failed"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Rate relay stopped");
    Ok(())
}
