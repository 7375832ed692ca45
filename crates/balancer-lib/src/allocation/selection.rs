//! Least-priced host selection per load balancer
//!
//! Candidate hosts are deduplicated and shuffled before the scan so that
//! hosts with exactly equal prices are chosen uniformly at random, however
//! many replicas each one runs. The load-balancer router
//! uses first-seen-wins for its own ties; the two rules differ.

use super::pricing::PriceVector;
use crate::topology::{LoadBalancer, Topology};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// Endpoint chosen for one load balancer this round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LbAssignment {
    pub lb_name: String,
    pub lb_address: String,
    pub host_name: String,
    pub pod_name: String,
    pub pod_address: String,
    pub price: f64,
}

/// Host with the minimal price among the hosts running `candidates`
///
/// Pods missing from the topology and hosts without a price are ignored.
pub fn least_priced_host<R: Rng + ?Sized>(
    candidates: &[String],
    topology: &Topology,
    prices: &PriceVector,
    rng: &mut R,
) -> Option<(String, f64)> {
    let mut hosts: Vec<(&str, f64)> = Vec::with_capacity(candidates.len());
    for pod_name in candidates {
        let Some(pod) = topology.pod(pod_name) else {
            continue;
        };
        let Some(price) = prices.get(&pod.host_name) else {
            continue;
        };
        if !hosts.iter().any(|(host, _)| *host == pod.host_name) {
            hosts.push((pod.host_name.as_str(), price));
        }
    }
    hosts.shuffle(rng);

    let mut best: Option<(&str, f64)> = None;
    for (host, price) in hosts {
        if best.map_or(true, |(_, min)| price < min) {
            best = Some((host, price));
        }
    }

    best.map(|(host, price)| (host.to_string(), price))
}

/// Pick the optimal host and its pod for one load balancer
pub fn assign<R: Rng + ?Sized>(
    lb: &LoadBalancer,
    topology: &Topology,
    prices: &PriceVector,
    rng: &mut R,
) -> Option<LbAssignment> {
    let (host_name, price) = least_priced_host(&lb.pod_names, topology, prices, rng)?;
    let pod = topology.pod_on_host(lb, &host_name)?;

    Some(LbAssignment {
        lb_name: lb.name.clone(),
        lb_address: lb.ip_address.clone(),
        host_name,
        pod_name: pod.name.clone(),
        pod_address: pod.ip_address.clone(),
        price,
    })
}

/// Assignments for every load balancer that has at least one priced pod
pub fn optimal_assignments<R: Rng + ?Sized>(
    topology: &Topology,
    prices: &PriceVector,
    rng: &mut R,
) -> Vec<LbAssignment> {
    topology
        .load_balancers()
        .iter()
        .filter_map(|lb| assign(lb, topology, prices, rng))
        .collect()
}
