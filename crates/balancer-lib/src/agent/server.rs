//! TCP listener for the node agent

use super::cgroup::CpuController;
use super::session::AgentSession;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub const DEFAULT_AGENT_ADDR: &str = "127.0.0.1:9988";

pub struct AgentServer {
    controller: Arc<dyn CpuController>,
    sample_interval: Duration,
}

impl AgentServer {
    pub fn new(controller: Arc<dyn CpuController>, sample_interval: Duration) -> Self {
        Self {
            controller,
            sample_interval,
        }
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Accept until shutdown; each connection gets its own session task
    pub async fn serve(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Node agent listening");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(peer = %peer, "Controller connected");
                            let session = AgentSession::new(
                                peer.to_string(),
                                self.controller.clone(),
                                self.sample_interval,
                            );
                            tokio::spawn(session.run(stream));
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down node agent listener");
                    break;
                }
            }
        }
    }
}
