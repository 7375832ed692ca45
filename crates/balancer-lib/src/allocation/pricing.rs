//! Congestion pricing
//!
//! Every round each host price moves by the step size times its excess load
//! plus a barrier term `1/Σ price` that keeps the aggregate price away from
//! zero. The absolute value clamps the result to be non-negative.

use super::{Allocation, AllocationStrategy, Signals};
use crate::error::{BalancerError, Result};
use crate::models::PodLoads;
use crate::topology::Topology;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Step size used by the deployment
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Every host starts at this price
pub const INITIAL_PRICE: f64 = 1.0;

/// One price per host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceVector {
    prices: BTreeMap<String, f64>,
}

impl PriceVector {
    /// All hosts at [`INITIAL_PRICE`]
    pub fn initial(topology: &Topology) -> Self {
        Self {
            prices: topology
                .hosts()
                .iter()
                .map(|h| (h.name.clone(), INITIAL_PRICE))
                .collect(),
        }
    }

    pub fn from_prices(prices: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            prices: prices.into_iter().collect(),
        }
    }

    pub fn get(&self, host_name: &str) -> Option<f64> {
        self.prices.get(host_name).copied()
    }

    pub fn sum(&self) -> f64 {
        self.prices.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(h, p)| (h.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Synchronous update: every host reads this full vector, none sees a
    /// partially updated one.
    pub fn next(&self, topology: &Topology, host_loads: &HashMap<String, i64>, epsilon: f64) -> Self {
        let sum_of_old_prices = self.sum();

        let prices = topology
            .hosts()
            .iter()
            .map(|host| {
                let old = self.get(&host.name).unwrap_or(INITIAL_PRICE);
                let load = host_loads.get(&host.name).copied().unwrap_or(0);
                let price = next_price(old, epsilon, load, host.load_capacity, sum_of_old_prices);
                (host.name.clone(), price)
            })
            .collect();

        Self { prices }
    }
}

/// `| old + ε · (load − capacity + 1/Σ old) |`
///
/// A zero price sum drops the barrier term instead of dividing by zero.
pub fn next_price(old_price: f64, epsilon: f64, load: i64, capacity: i64, sum_of_old_prices: f64) -> f64 {
    let barrier = if sum_of_old_prices > 0.0 {
        1.0 / sum_of_old_prices
    } else {
        0.0
    };

    (old_price + epsilon * (load as f64 - capacity as f64 + barrier)).abs()
}

/// Sum the latest load of every pod listed by each host
pub fn host_loads(topology: &Topology, pod_loads: &PodLoads) -> HashMap<String, i64> {
    topology
        .hosts()
        .iter()
        .map(|host| {
            let load = host
                .pod_names
                .iter()
                .map(|pod| pod_loads.get(pod).copied().unwrap_or(0))
                .sum();
            (host.name.clone(), load)
        })
        .collect()
}

/// Congestion pricing strategy holding the live price vector
pub struct PricingStrategy {
    epsilon: f64,
    prices: PriceVector,
}

impl PricingStrategy {
    pub fn new(topology: &Topology, epsilon: f64) -> Self {
        Self {
            epsilon,
            prices: PriceVector::initial(topology),
        }
    }

    pub fn prices(&self) -> &PriceVector {
        &self.prices
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Advance one round and return the new vector
    pub fn update(&mut self, topology: &Topology, pod_loads: &PodLoads) -> &PriceVector {
        let loads = host_loads(topology, pod_loads);
        let next = self.prices.next(topology, &loads, self.epsilon);
        debug!(hosts = next.len(), sum = next.sum(), "Price vector updated");
        self.prices = next;
        &self.prices
    }
}

#[async_trait]
impl AllocationStrategy for PricingStrategy {
    fn name(&self) -> &'static str {
        "pricing"
    }

    async fn allocate(&mut self, topology: &Topology, signals: &Signals) -> Result<Allocation> {
        match signals {
            Signals::PodLoads(pod_loads) => {
                Ok(Allocation::Prices(self.update(topology, pod_loads).clone()))
            }
            Signals::Utilizations(_) => Err(BalancerError::MalformedInput(
                "pricing needs pod loads, got utilizations".to_string(),
            )),
        }
    }
}
