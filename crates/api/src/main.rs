use std::sync::Arc;

use anyhow::Context;

use linkdesk_api::app::{build_app, services};
use linkdesk_api::config::ServerConfig;
use linkdesk_auth::AuthorizationGate;
use linkdesk_infra::linking::LoggingLinker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    linkdesk_observability::init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let gate = AuthorizationGate::new(config.jwt_secret.clone(), config.admin_role.clone());
    let (services, dispatcher) = services::start(&config, Arc::new(LoggingLinker))
        .context("failed to start linking queue")?;

    let app = build_app(gate, services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("draining linking dispatcher");
    dispatcher.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
