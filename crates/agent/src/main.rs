//! Node agent - applies CPU shares and samples CPU usage for one host
//!
//! This binary runs on every host, serving the controller's line protocol
//! over TCP and writing into the local cgroup v1 tree.

use anyhow::{Context, Result};
use balancer_lib::{
    agent::{AgentServer, CgroupCpuController},
    api::ops_router,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting node-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        cgroup_root = %config.cgroup_root,
        sample_interval_ms = config.sample_interval_ms,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::LISTENER).await;

    let logger = StructuredLogger::new(&config.node_name);

    let listener = AgentServer::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    logger.log_startup(AGENT_VERSION, &config.listen_addr);
    health_registry.set_healthy(components::LISTENER).await;

    let controller = Arc::new(CgroupCpuController::new(&config.cgroup_root));
    let server = AgentServer::new(controller, config.sample_interval());

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move { server.serve(listener, server_shutdown).await });

    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", api_addr))?;
    info!(addr = %api_addr, "Starting API server");
    let api_router = ops_router(health_registry.clone());
    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(api_listener, api_router).await {
            warn!(error = %e, "API server stopped");
        }
    });

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    api_handle.abort();

    Ok(())
}
