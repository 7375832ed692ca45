//! Interval-driven solved CPU-share loop
//!
//! Every interval the controller samples utilization from each node agent,
//! asks the strategy for a share plan and pushes one `applyCPUShares` batch
//! per host. Agents that cannot be reached are skipped until a later round
//! re-dials them.

use crate::agent::NodeAgentClient;
use crate::allocation::{Allocation, AllocationStrategy, SharePlan, Signals};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::NodeUtilization;
use crate::observability::{BalancerMetrics, StructuredLogger};
use crate::topology::Topology;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connection to one host's node agent plus the pods it must know about
pub struct AgentLink {
    host_name: String,
    client: NodeAgentClient,
    pods: Vec<(String, String)>,
    registered: bool,
}

impl AgentLink {
    pub fn new(host_name: impl Into<String>, address: impl Into<String>, pods: Vec<(String, String)>) -> Self {
        Self {
            host_name: host_name.into(),
            client: NodeAgentClient::new(address),
            pods,
            registered: false,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn is_registered(&self) -> bool {
        self.registered && self.client.is_connected()
    }

    /// Register pods on a fresh connection; the agent forgets them on reconnect
    pub async fn ensure_registered(&mut self) -> Result<bool> {
        if self.is_registered() {
            return Ok(true);
        }
        self.registered = self.client.update_pods(&self.pods).await?;
        if !self.registered {
            warn!(host = %self.host_name, "Node agent rejected pod registration");
        }
        Ok(self.registered)
    }

    pub async fn sample(&mut self) -> Result<NodeUtilization> {
        let utilizations = self.client.get_cpu_utilizations().await;
        self.track_connection();
        Ok(NodeUtilization {
            host_name: self.host_name.clone(),
            utilizations: utilizations?,
        })
    }

    pub async fn apply(&mut self, shares: &[(String, f64)]) -> Result<bool> {
        let applied = self.client.apply_cpu_shares(shares).await;
        self.track_connection();
        applied
    }

    fn track_connection(&mut self) {
        if !self.client.is_connected() {
            self.registered = false;
        }
    }
}

/// Agent links for every host with an agent address; pods without a uid are left out
pub fn links_from_topology(topology: &Topology) -> Vec<AgentLink> {
    topology
        .hosts()
        .iter()
        .filter_map(|host| {
            let Some(address) = host.agent_address.as_deref() else {
                warn!(host = %host.name, "Host has no agent address, shares will not be applied");
                return None;
            };
            let pods = topology
                .pods_of_host(host)
                .filter_map(|pod| match &pod.uid {
                    Some(uid) => Some((pod.name.clone(), uid.clone())),
                    None => {
                        warn!(pod = %pod.name, "Pod has no uid, skipping registration");
                        None
                    }
                })
                .collect();
            Some(AgentLink::new(&host.name, address, pods))
        })
        .collect()
}

type SharedLink = Arc<Mutex<AgentLink>>;

pub struct SharesController {
    topology: Arc<Topology>,
    strategy: Box<dyn AllocationStrategy>,
    links: Vec<SharedLink>,
    interval: Duration,
    health: HealthRegistry,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
}

/// Outcome of one solved-shares round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharesRound {
    pub sampled_hosts: usize,
    pub applied_hosts: Vec<String>,
    pub skipped: Option<String>,
}

impl SharesController {
    pub fn new(
        topology: Arc<Topology>,
        strategy: Box<dyn AllocationStrategy>,
        links: Vec<AgentLink>,
        interval: Duration,
        health: HealthRegistry,
    ) -> Self {
        Self {
            topology,
            strategy,
            links: links.into_iter().map(|l| Arc::new(Mutex::new(l))).collect(),
            interval,
            health,
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("controller"),
        }
    }

    /// Register pods on every agent that is not registered yet
    pub async fn register_all(&self) -> usize {
        let mut tasks = JoinSet::new();
        for link in &self.links {
            let link = link.clone();
            tasks.spawn(async move {
                let mut link = link.lock().await;
                match link.ensure_registered().await {
                    Ok(registered) => registered,
                    Err(e) => {
                        warn!(host = %link.host_name(), error = %e, "Node agent unreachable");
                        false
                    }
                }
            });
        }

        let mut registered = 0;
        while let Some(joined) = tasks.join_next().await {
            if matches!(joined, Ok(true)) {
                registered += 1;
            }
        }
        registered
    }

    async fn sample_all(&self) -> Vec<NodeUtilization> {
        let mut tasks = JoinSet::new();
        for link in &self.links {
            let link = link.clone();
            tasks.spawn(async move {
                let mut link = link.lock().await;
                match link.ensure_registered().await {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => {
                        warn!(host = %link.host_name(), error = %e, "Skipping unreachable node agent");
                        return None;
                    }
                }
                match link.sample().await {
                    Ok(node) => Some(node),
                    Err(e) => {
                        warn!(host = %link.host_name(), error = %e, "Utilization sample failed");
                        None
                    }
                }
            });
        }

        let mut nodes = Vec::with_capacity(self.links.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(node)) = joined {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        nodes
    }

    async fn apply_all(&self, plan: &SharePlan) -> Vec<String> {
        let mut tasks = JoinSet::new();
        for link in &self.links {
            let link = link.clone();
            let host = link.lock().await.host_name().to_string();
            let Some(shares) = plan.for_host(&host).map(<[_]>::to_vec) else {
                debug!(host = %host, "No shares planned for host");
                continue;
            };
            let metrics = self.metrics.clone();
            let logger = self.logger.clone();
            tasks.spawn(async move {
                let mut link = link.lock().await;
                let applied = match link.apply(&shares).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        warn!(host = %host, error = %e, "Failed to push shares");
                        false
                    }
                };
                metrics.inc_agent_commands("applyCPUShares", applied);
                logger.log_shares_applied(&host, shares.len(), applied);
                applied.then_some(host)
            });
        }

        let mut applied = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(host)) = joined {
                applied.push(host);
            }
        }
        applied.sort();
        applied
    }

    /// Sample, solve and apply once
    pub async fn run_round(&mut self) -> SharesRound {
        let started = Instant::now();
        let nodes = self.sample_all().await;
        let mut round = SharesRound {
            sampled_hosts: nodes.len(),
            ..SharesRound::default()
        };

        if nodes.len() < self.links.len() {
            self.health
                .set_degraded(
                    components::AGENTS,
                    format!("{} of {} node agents answered", nodes.len(), self.links.len()),
                )
                .await;
        } else {
            self.health.set_healthy(components::AGENTS).await;
        }

        let allocation = self
            .strategy
            .allocate(&self.topology, &Signals::Utilizations(nodes))
            .await;

        match allocation {
            Ok(Allocation::Shares(plan)) => {
                self.metrics.inc_solver_requests(true);
                round.applied_hosts = self.apply_all(&plan).await;
                self.health.set_healthy(components::ALLOCATION).await;
            }
            Ok(Allocation::Skipped(reason)) => {
                self.metrics.inc_solver_requests(false);
                self.health
                    .set_degraded(components::ALLOCATION, reason.clone())
                    .await;
                round.skipped = Some(reason);
            }
            Ok(other) => {
                warn!(allocation = ?other, "Unexpected allocation for shares loop");
                round.skipped = Some("unexpected allocation".to_string());
            }
            Err(e) => {
                warn!(error = %e, "Allocation failed, previous shares stay in force");
                self.health
                    .set_degraded(components::ALLOCATION, e.to_string())
                    .await;
                round.skipped = Some(e.to_string());
            }
        }

        self.metrics.inc_rounds();
        self.metrics
            .observe_round_duration(started.elapsed().as_secs_f64());
        round
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            strategy = self.strategy.name(),
            agents = self.links.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting shares loop"
        );

        let registered = self.register_all().await;
        info!(registered, agents = self.links.len(), "Pods registered with node agents");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let round = self.run_round().await;
                    debug!(
                        sampled = round.sampled_hosts,
                        applied = round.applied_hosts.len(),
                        skipped = ?round.skipped,
                        "Shares round complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down shares loop");
                    break;
                }
            }
        }
    }
}
