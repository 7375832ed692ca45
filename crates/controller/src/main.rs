//! Controller - closes the feedback loop between workloads and load balancers
//!
//! In pricing mode it collects load reports and repoints every load
//! balancer at its cheapest host. In solver mode it drives the node agents
//! with CPU shares computed by the optimizer.

use anyhow::{Context, Result};
use balancer_lib::{
    allocation::{SolverClient, SolverStrategy},
    controller::{
        links_from_topology, ControllerMode, IngressState, LbNotifier, PricingController,
        RoundCollector, SharesController,
    },
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    Topology,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting controller");

    let config = config::ControllerConfig::load()?;
    let topology = Arc::new(Topology::from_env().context("Failed to load topology")?);
    info!(
        mode = %config.mode,
        hosts = topology.hosts().len(),
        pods = topology.pods().len(),
        load_balancers = topology.load_balancers().len(),
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ALLOCATION).await;

    let logger = StructuredLogger::new("controller");
    let (shutdown_tx, _) = broadcast::channel(1);

    let (ingress, loop_handle) = match config.mode {
        ControllerMode::Pricing => {
            if topology.pods().is_empty() {
                anyhow::bail!("pricing mode needs at least one pod in PODS");
            }
            health_registry.register(components::INGRESS).await;
            health_registry.register(components::NOTIFIER).await;

            let (tx, rx) = mpsc::channel(config.ingress_queue);
            let collector = RoundCollector::new(
                rx,
                topology.pods().iter().map(|p| p.name.clone()),
                config.round_timeout(),
            );
            let notifier = LbNotifier::new(config.notify_timeout())
                .context("Failed to build notification client")?;
            let controller = PricingController::new(
                topology.clone(),
                config.epsilon,
                collector,
                notifier,
                health_registry.clone(),
            );

            let handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));
            health_registry.set_healthy(components::INGRESS).await;
            (Some(IngressState::new(tx)), handle)
        }
        ControllerMode::Solver => {
            health_registry.register(components::AGENTS).await;

            let client = SolverClient::new(&config.solver_url, config.host_cap)
                .context("Failed to build solver client")?;
            let links = links_from_topology(&topology);
            if links.is_empty() {
                warn!("No host has an agent address, shares will never be applied");
            }
            let controller = SharesController::new(
                topology.clone(),
                Box::new(SolverStrategy::new(client)),
                links,
                config.interval(),
                health_registry.clone(),
            );

            (None, tokio::spawn(controller.run(shutdown_tx.subscribe())))
        }
    };

    let router = api::create_router(ingress, health_registry.clone());
    let api_handle = tokio::spawn(api::serve(config.port, router, shutdown_tx.subscribe()));

    logger.log_startup(CONTROLLER_VERSION, &format!("0.0.0.0:{}", config.port));
    health_registry.set_ready(true).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            served.context("HTTP server task failed")??;
            logger.log_shutdown("HTTP server stopped");
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;
    info!("Shutting down");

    Ok(())
}
