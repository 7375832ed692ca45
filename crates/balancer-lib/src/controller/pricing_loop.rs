//! Round-driven congestion pricing loop

use super::notifier::{LbNotifier, NotifyResult};
use super::round::{RoundCollector, RoundOutcome};
use crate::allocation::{
    optimal_assignments, Allocation, AllocationStrategy, PriceVector, PricingStrategy, Signals,
};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::PodLoads;
use crate::observability::{BalancerMetrics, StructuredLogger};
use crate::topology::Topology;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

/// What one closed round produced
#[derive(Debug, Clone)]
pub struct PricingRound {
    pub round: u64,
    pub prices: PriceVector,
    pub notifications: Vec<NotifyResult>,
}

pub struct PricingController {
    topology: Arc<Topology>,
    strategy: PricingStrategy,
    collector: RoundCollector,
    notifier: LbNotifier,
    rng: StdRng,
    health: HealthRegistry,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
    round: u64,
}

impl PricingController {
    pub fn new(
        topology: Arc<Topology>,
        epsilon: f64,
        collector: RoundCollector,
        notifier: LbNotifier,
        health: HealthRegistry,
    ) -> Self {
        let strategy = PricingStrategy::new(&topology, epsilon);
        Self {
            topology,
            strategy,
            collector,
            notifier,
            rng: StdRng::from_os_rng(),
            health,
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("controller"),
            round: 0,
        }
    }

    /// Fixed seed for reproducible tie-breaks
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn prices(&self) -> &PriceVector {
        self.strategy.prices()
    }

    /// Price the closed round, pick endpoints and notify every load balancer
    pub async fn apply_round(&mut self, pod_loads: PodLoads) -> Result<PricingRound> {
        let started = Instant::now();
        self.round += 1;

        let total_load: i64 = pod_loads.values().sum();
        self.logger
            .log_round_closed(self.round, pod_loads.len(), total_load);

        let prices = match self
            .strategy
            .allocate(&self.topology, &Signals::PodLoads(pod_loads))
            .await?
        {
            Allocation::Prices(prices) => prices,
            other => {
                warn!(allocation = ?other, "Pricing produced no price vector");
                self.strategy.prices().clone()
            }
        };

        for (host, price) in prices.iter() {
            self.metrics.set_host_price(host, price);
        }
        let listed: Vec<(String, f64)> = prices.iter().map(|(h, p)| (h.to_string(), p)).collect();
        self.logger.log_prices_updated(self.round, &listed);

        let assignments = optimal_assignments(&self.topology, &prices, &mut self.rng);
        let skipped = self.topology.load_balancers().len() - assignments.len();
        if skipped > 0 {
            warn!(skipped, "Load balancers without a priced pod were not notified");
        }

        let notifications = self.notifier.notify_all(assignments).await;
        if notifications.iter().all(NotifyResult::is_success) {
            self.health.set_healthy(components::NOTIFIER).await;
        } else {
            self.health
                .set_degraded(components::NOTIFIER, "Some load balancers rejected the update")
                .await;
        }

        self.metrics.inc_rounds();
        self.metrics
            .observe_round_duration(started.elapsed().as_secs_f64());

        Ok(PricingRound {
            round: self.round,
            prices,
            notifications,
        })
    }

    /// Collect rounds until shutdown or until the ingress goes away
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            pods = self.collector.expected().len(),
            hosts = self.topology.hosts().len(),
            epsilon = self.strategy.epsilon(),
            "Starting pricing loop"
        );
        self.health.set_healthy(components::ALLOCATION).await;

        loop {
            let outcome = tokio::select! {
                outcome = self.collector.next_round() => outcome,
                _ = shutdown.recv() => {
                    info!("Shutting down pricing loop");
                    break;
                }
            };

            match outcome {
                RoundOutcome::Complete(loads) => {
                    if let Err(e) = self.apply_round(loads).await {
                        warn!(error = %e, "Round failed, prices unchanged");
                        self.health
                            .set_degraded(components::ALLOCATION, e.to_string())
                            .await;
                    } else {
                        self.health.set_healthy(components::ALLOCATION).await;
                    }
                }
                RoundOutcome::TimedOut { missing } => {
                    self.metrics.inc_rounds_abandoned();
                    self.logger.log_round_abandoned(self.round + 1, &missing);
                    self.health
                        .set_degraded(
                            components::ALLOCATION,
                            format!("{} reporters missing", missing.len()),
                        )
                        .await;
                }
                RoundOutcome::Closed => {
                    warn!("Report channel closed, stopping pricing loop");
                    break;
                }
            }
        }
    }
}
