//! HTTP surface of the controller: load report ingress plus ops endpoints

use balancer_lib::{
    api::ops_router,
    controller::{ingress_router, IngressState},
    health::HealthRegistry,
};
use axum::Router;
use tracing::info;

/// The ingress is only mounted when a round collector consumes it
pub fn create_router(ingress: Option<IngressState>, health_registry: HealthRegistry) -> Router {
    let router = ops_router(health_registry);
    match ingress {
        Some(state) => router.merge(ingress_router(state)),
        None => router,
    }
}

pub async fn serve(
    port: u16,
    router: Router,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting controller HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
