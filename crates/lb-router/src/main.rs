//! Load balancer - forwards one application's traffic to its endpoints
//!
//! The controller repoints this process by sending `?endpoints=a,b` on any
//! request; every other request is proxied to the selected endpoint.

use anyhow::{Context, Result};
use balancer_lib::{
    api::ops_router,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    router::{create_router, EndpointSet, RouterState},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const ROUTER_VERSION: &str = env!("CARGO_PKG_VERSION");

async fn serve(addr: String, router: axum::Router, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting lb-router");

    let config = config::RouterConfig::load()?;
    let endpoints = config.endpoints();
    let endpoint_set = Arc::new(EndpointSet::new(
        &endpoints,
        config.algorithm()?,
        config.upstream_port,
    ));
    info!(
        endpoints = ?endpoints,
        algorithm = endpoint_set.algorithm().as_str(),
        upstream_port = config.upstream_port,
        "Load balancer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENDPOINTS).await;
    if endpoint_set.is_empty() {
        warn!("No initial endpoints, requests fail with 503 until the controller sends some");
        health_registry
            .set_degraded(components::ENDPOINTS, "no endpoints configured")
            .await;
    } else {
        health_registry.set_healthy(components::ENDPOINTS).await;
    }

    let logger = StructuredLogger::new("lb-router");
    let state = Arc::new(
        RouterState::new(endpoint_set, config.upstream_timeout())
            .with_health(health_registry.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let proxy_handle = tokio::spawn(serve(
        format!("0.0.0.0:{}", config.port),
        create_router(state),
        shutdown_tx.subscribe(),
    ));
    let admin_handle = tokio::spawn(serve(
        format!("0.0.0.0:{}", config.admin_port),
        ops_router(health_registry.clone()),
        shutdown_tx.subscribe(),
    ));

    logger.log_startup(ROUTER_VERSION, &format!("0.0.0.0:{}", config.port));
    health_registry.set_ready(true).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        served = proxy_handle => {
            served.context("Proxy task failed")??;
            logger.log_shutdown("proxy server stopped");
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(());
    let _ = admin_handle.await;
    info!("Shutting down");

    Ok(())
}
