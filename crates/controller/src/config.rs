//! Controller configuration

use anyhow::{Context, Result};
use balancer_lib::allocation::solver::DEFAULT_HOST_CAP;
use balancer_lib::allocation::DEFAULT_EPSILON;
use balancer_lib::controller::{ControllerMode, DEFAULT_INGRESS_QUEUE};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// `pricing` (load reports and congestion prices) or `solver` (CPU shares)
    #[serde(default)]
    pub mode: ControllerMode,

    /// Port for the ingress plus health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Step size of the price update
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Abandon a round when not every pod reported in time; unset waits forever
    #[serde(default)]
    pub round_timeout_ms: Option<u64>,

    /// Capacity of the channel between ingress and round collector
    #[serde(default = "default_ingress_queue")]
    pub ingress_queue: usize,

    /// Per-request timeout for load balancer notifications; unset waits forever
    #[serde(default)]
    pub notify_timeout_ms: Option<u64>,

    /// Solver mode: period between share rounds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_solver_url")]
    pub solver_url: String,

    /// Solver mode: CPU capacity of each host sent with every query
    #[serde(default = "default_host_cap")]
    pub host_cap: f64,
}

fn default_port() -> u16 {
    3000
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_ingress_queue() -> usize {
    DEFAULT_INGRESS_QUEUE
}

fn default_interval() -> u64 {
    1000
}

fn default_solver_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_host_cap() -> f64 {
    DEFAULT_HOST_CAP
}

impl ControllerConfig {
    /// Load configuration from `CONTROLLER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("CONTROLLER"))
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read controller configuration")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid controller configuration")?;

        if !parsed.epsilon.is_finite() || parsed.epsilon <= 0.0 {
            anyhow::bail!("epsilon must be a positive number, got {}", parsed.epsilon);
        }
        if parsed.ingress_queue == 0 {
            anyhow::bail!("ingress_queue must be positive");
        }
        if parsed.interval_ms == 0 {
            anyhow::bail!("interval_ms must be positive");
        }
        Ok(parsed)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_ms.map(Duration::from_millis)
    }

    pub fn notify_timeout(&self) -> Option<Duration> {
        self.notify_timeout_ms.map(Duration::from_millis)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
