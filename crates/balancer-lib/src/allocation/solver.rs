//! Solved CPU-share weights
//!
//! Per-application utilization is sent to an external optimizer as query
//! parameters; the answer carries a status code and one weight per
//! (app, host) pair in use, keyed `t<app><host>`.

use super::{Allocation, AllocationStrategy, Signals};
use crate::error::{BalancerError, Result};
use crate::models::NodeUtilization;
use crate::topology::Topology;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use url::Url;

/// The only status the optimizer uses for a solved model
pub const SOLVER_SUCCESS: i64 = 2;

/// Capacity passed to the optimizer for every host
pub const DEFAULT_HOST_CAP: f64 = 200.0;

/// Raw optimizer answer
#[derive(Debug, Clone, Deserialize)]
pub struct SolverResponse {
    pub status: i64,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl SolverResponse {
    pub fn is_success(&self) -> bool {
        self.status == SOLVER_SUCCESS
    }

    /// `(app, host) -> weight` for every well-formed weight key
    pub fn weights(&self) -> BTreeMap<(usize, usize), f64> {
        self.fields
            .iter()
            .filter_map(|(key, value)| Some((parse_weight_key(key)?, value.as_f64()?)))
            .collect()
    }
}

/// `t01` is app 0 on host 1; `t12_3` is app 12 on host 3
pub fn parse_weight_key(key: &str) -> Option<(usize, usize)> {
    let digits = key.strip_prefix('t')?;
    if let Some((app, host)) = digits.split_once('_') {
        return Some((app.parse().ok()?, host.parse().ok()?));
    }

    let bytes = digits.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(((bytes[0] - b'0') as usize, (bytes[1] - b'0') as usize))
}

/// Shares to push to each host's agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharePlan {
    shares: BTreeMap<String, Vec<(String, f64)>>,
}

impl SharePlan {
    /// Map solver weights onto pods: app index selects the load balancer,
    /// host index selects the host, and their common pod receives the share.
    pub fn from_weights(topology: &Topology, weights: &BTreeMap<(usize, usize), f64>) -> Self {
        let mut shares: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();

        for (&(app, host), &weight) in weights {
            let (Some(lb), Some(host)) = (
                topology.load_balancers().get(app),
                topology.hosts().get(host),
            ) else {
                debug!(app, host, "Solver weight for unknown app/host pair ignored");
                continue;
            };
            let Some(pod) = topology.pod_on_host(lb, &host.name) else {
                debug!(lb = %lb.name, host = %host.name, "No pod for solver weight");
                continue;
            };
            shares
                .entry(host.name.clone())
                .or_default()
                .push((pod.name.clone(), weight));
        }

        Self { shares }
    }

    pub fn for_host(&self, host_name: &str) -> Option<&[(String, f64)]> {
        self.shares.get(host_name).map(Vec::as_slice)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.shares.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// Sum utilization per application, skipping sentinel and unknown pods
pub fn per_app_utilization(topology: &Topology, nodes: &[NodeUtilization]) -> Vec<f64> {
    let mut apps = vec![0.0; topology.load_balancers().len()];

    for node in nodes {
        for util in &node.utilizations {
            if util.is_sentinel() {
                continue;
            }
            let app = topology
                .pod(&util.pod_name)
                .and_then(|pod| topology.app_index(&pod.lb_name));
            match app {
                Some(i) => apps[i] += util.percent,
                None => debug!(pod = %util.pod_name, "Utilization for pod outside topology"),
            }
        }
    }

    apps
}

/// HTTP client for the optimizer service
#[derive(Clone)]
pub struct SolverClient {
    http: reqwest::Client,
    base_url: Url,
    host_cap: f64,
}

impl SolverClient {
    pub fn new(base_url: &str, host_cap: f64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BalancerError::Config(format!("invalid solver url {}: {}", base_url, e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            host_cap,
        })
    }

    /// Query string sent for the given per-app utilization
    pub fn query(&self, app_utils: &[f64]) -> Vec<(String, String)> {
        let mut params = vec![("host_cap".to_string(), format!("{:.6}", self.host_cap))];
        params.extend(
            app_utils
                .iter()
                .enumerate()
                .map(|(i, util)| (format!("t{}", i), (util.trunc() as i64).to_string())),
        );
        params
    }

    pub async fn solve(&self, app_utils: &[f64]) -> Result<SolverResponse> {
        let mut url = self.base_url.clone();
        url.set_path("/");

        let response = self
            .http
            .get(url)
            .query(&self.query(app_utils))
            .send()
            .await
            .map_err(|e| BalancerError::external("solver", e))?;

        if !response.status().is_success() {
            return Err(BalancerError::external(
                "solver",
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| BalancerError::external("solver", e))
    }
}

/// Allocation strategy backed by the optimizer
pub struct SolverStrategy {
    client: SolverClient,
}

impl SolverStrategy {
    pub fn new(client: SolverClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AllocationStrategy for SolverStrategy {
    fn name(&self) -> &'static str {
        "solver"
    }

    async fn allocate(&mut self, topology: &Topology, signals: &Signals) -> Result<Allocation> {
        let Signals::Utilizations(nodes) = signals else {
            return Err(BalancerError::MalformedInput(
                "solver needs utilizations, got pod loads".to_string(),
            ));
        };

        let app_utils = per_app_utilization(topology, nodes);

        let response = match self.client.solve(&app_utils).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Solver unavailable, keeping previous shares");
                return Ok(Allocation::Skipped(e.to_string()));
            }
        };

        if !response.is_success() {
            warn!(status = response.status, "Solver returned non-success status, keeping previous shares");
            return Ok(Allocation::Skipped(format!(
                "solver status {}",
                response.status
            )));
        }

        Ok(Allocation::Shares(SharePlan::from_weights(
            topology,
            &response.weights(),
        )))
    }
}
