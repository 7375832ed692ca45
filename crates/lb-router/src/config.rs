//! Load balancer configuration

use anyhow::{Context, Result};
use balancer_lib::router::{LbAlgorithm, DEFAULT_UPSTREAM_PORT};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Comma-separated initial endpoints; the controller replaces them at runtime
    #[serde(default)]
    pub endpoints: String,

    /// `none` or `least_request`; picked from the endpoint count when unset
    #[serde(default)]
    pub algorithm: Option<String>,

    /// Port that accepts client traffic
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port appended to endpoints given without one
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,

    /// Port for health and metrics
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Per-request upstream timeout; unset waits forever
    #[serde(default)]
    pub upstream_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    3000
}

fn default_upstream_port() -> u16 {
    DEFAULT_UPSTREAM_PORT
}

fn default_admin_port() -> u16 {
    9091
}

impl RouterConfig {
    /// Load configuration from `LB_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("LB"))
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read load balancer configuration")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid load balancer configuration")?;
        parsed.algorithm()?;
        Ok(parsed)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn algorithm(&self) -> Result<Option<LbAlgorithm>> {
        self.algorithm
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| a.parse::<LbAlgorithm>())
            .transpose()
            .context("Invalid load balancing algorithm")
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("LB").source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = RouterConfig::from_source(env(&[])).unwrap();
        assert!(config.endpoints().is_empty());
        assert_eq!(config.algorithm().unwrap(), None);
        assert_eq!(config.port, 3000);
        assert_eq!(config.upstream_port, 3000);
        assert_eq!(config.upstream_timeout(), None);
    }

    #[test]
    fn test_endpoints_and_algorithm() {
        let config = RouterConfig::from_source(env(&[
            ("LB_ENDPOINTS", "10.1.0.5, 10.1.0.6:8080,"),
            ("LB_ALGORITHM", "least_request"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints(), vec!["10.1.0.5", "10.1.0.6:8080"]);
        assert_eq!(config.algorithm().unwrap(), Some(LbAlgorithm::LeastRequest));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        assert!(RouterConfig::from_source(env(&[("LB_ALGORITHM", "round_robin")])).is_err());
    }
}
