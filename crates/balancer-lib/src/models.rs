//! Core data models shared by the controller, agents and load balancers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest request count per pod for one closed round
pub type PodLoads = HashMap<String, i64>;

/// Utilization reported for a pod whose usage counter could not be read
pub const UTILIZATION_SENTINEL: f64 = -1.0;

/// One report from a workload to the controller ingress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub pod_name: String,
    /// Round marker (unix nanoseconds at the reporter's tick)
    pub k: i64,
    /// Requests received since the previous report
    pub a: i64,
}

/// Sample kept by the round collector for a pod that reported this round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSample {
    pub k: i64,
    pub a: i64,
}

/// Per-pod utilization figures returned by one node agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUtilization {
    pub host_name: String,
    pub utilizations: Vec<PodUtilization>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUtilization {
    pub pod_name: String,
    pub percent: f64,
}

impl PodUtilization {
    pub fn new(pod_name: impl Into<String>, percent: f64) -> Self {
        Self {
            pod_name: pod_name.into(),
            percent,
        }
    }

    /// True when the agent could not sample this pod
    pub fn is_sentinel(&self) -> bool {
        self.percent < 0.0
    }
}
