//! Node agent: CPU share enforcement and utilization sampling
//!
//! The agent speaks a line protocol over TCP. Each connection registers the
//! pods it cares about (`updatePods`), then asks for utilization samples or
//! pushes CPU shares that are written straight into the cgroup v1 tree.

mod cgroup;
mod client;
mod protocol;
mod registry;
mod server;
mod session;

#[cfg(test)]
mod tests;

pub use cgroup::{
    sample_utilizations, utilization_percent, CgroupCpuController, CpuController,
    CPU_SHARES_FILE, CPU_USAGE_FILE, DEFAULT_CGROUP_ROOT, DEFAULT_SAMPLE_INTERVAL,
};
pub use client::NodeAgentClient;
pub use protocol::{parse_pod_shares, parse_pod_uids, Request, Response};
pub use registry::PodRegistry;
pub use server::{AgentServer, DEFAULT_AGENT_ADDR};
pub use session::{AgentSession, MAX_LINE_BYTES};
