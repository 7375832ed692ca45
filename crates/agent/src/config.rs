//! Node agent configuration

use anyhow::{Context, Result};
use balancer_lib::agent::{DEFAULT_AGENT_ADDR, DEFAULT_CGROUP_ROOT};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name used in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Address of the line-protocol listener
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// cgroup v1 cpu,cpuacct directory holding one directory per pod uid
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: String,

    /// Gap between the two usage samples of `getCPUUtilizations`
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Port for health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_listen_addr() -> String {
    DEFAULT_AGENT_ADDR.to_string()
}

fn default_cgroup_root() -> String {
    DEFAULT_CGROUP_ROOT.to_string()
}

fn default_sample_interval() -> u64 {
    100
}

fn default_api_port() -> u16 {
    9989
}

impl AgentConfig {
    /// Load configuration from `AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("AGENT"))
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read agent configuration")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid agent configuration")?;

        if parsed.sample_interval_ms == 0 {
            anyhow::bail!("sample_interval_ms must be positive");
        }
        Ok(parsed)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
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
        config::Environment::with_prefix("AGENT").source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_source(env(&[])).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9988");
        assert_eq!(config.cgroup_root, "/sys/fs/cgroup/cpu/kubepods/burstable");
        assert_eq!(config.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.api_port, 9989);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_source(env(&[
            ("AGENT_LISTEN_ADDR", "0.0.0.0:7000"),
            ("AGENT_CGROUP_ROOT", "/tmp/cgroup"),
            ("AGENT_SAMPLE_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.cgroup_root, "/tmp/cgroup");
        assert_eq!(config.sample_interval_ms, 250);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(AgentConfig::from_source(env(&[("AGENT_SAMPLE_INTERVAL_MS", "0")])).is_err());
    }
}
