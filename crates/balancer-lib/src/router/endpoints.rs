//! Live endpoint set for one application
//!
//! Each endpoint carries an outstanding-request counter. Selection bumps the
//! counter through an [`EndpointGuard`]; dropping the guard releases it.

use crate::error::{BalancerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Port workloads listen on when an address carries none
pub const DEFAULT_UPSTREAM_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LbAlgorithm {
    /// Always the first endpoint
    None,
    /// Fewest outstanding requests, first seen wins on ties
    LeastRequest,
}

impl LbAlgorithm {
    /// `None` for a single endpoint, otherwise `LeastRequest`
    pub fn auto(endpoint_count: usize) -> Self {
        if endpoint_count <= 1 {
            LbAlgorithm::None
        } else {
            LbAlgorithm::LeastRequest
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LbAlgorithm::None => "none",
            LbAlgorithm::LeastRequest => "least_request",
        }
    }
}

impl FromStr for LbAlgorithm {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LbAlgorithm::None),
            "least_request" | "least-request" => Ok(LbAlgorithm::LeastRequest),
            other => Err(BalancerError::Config(format!(
                "unknown load balancing algorithm {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Endpoint {
    address: String,
    outstanding: AtomicU64,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            outstanding: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement, never below zero
    fn release(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Holds one outstanding request on an endpoint until dropped
#[derive(Debug)]
pub struct EndpointGuard {
    endpoint: Arc<Endpoint>,
}

impl EndpointGuard {
    fn new(endpoint: Arc<Endpoint>) -> Self {
        endpoint.acquire();
        Self { endpoint }
    }

    pub fn address(&self) -> &str {
        self.endpoint.address()
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        self.endpoint.release();
    }
}

/// Ordered endpoints plus the selection rule
#[derive(Debug)]
pub struct EndpointSet {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    algorithm: Option<LbAlgorithm>,
    upstream_port: u16,
}

impl EndpointSet {
    /// `algorithm: None` picks [`LbAlgorithm::auto`] from the current size
    pub fn new(addresses: &[String], algorithm: Option<LbAlgorithm>, upstream_port: u16) -> Self {
        let endpoints = addresses
            .iter()
            .map(|a| Arc::new(Endpoint::new(with_port(a, upstream_port))))
            .collect();

        Self {
            endpoints: RwLock::new(endpoints),
            algorithm,
            upstream_port,
        }
    }

    pub fn upstream_port(&self) -> u16 {
        self.upstream_port
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Endpoint>>> {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn algorithm(&self) -> LbAlgorithm {
        self.algorithm
            .unwrap_or_else(|| LbAlgorithm::auto(self.read().len()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Address and outstanding count of every endpoint, in order
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.read()
            .iter()
            .map(|e| (e.address.clone(), e.outstanding()))
            .collect()
    }

    /// Choose an endpoint and take one outstanding slot on it
    pub fn select(&self) -> Option<EndpointGuard> {
        let endpoints = self.read();
        let algorithm = self
            .algorithm
            .unwrap_or_else(|| LbAlgorithm::auto(endpoints.len()));

        let chosen = match algorithm {
            LbAlgorithm::None => endpoints.first(),
            LbAlgorithm::LeastRequest => {
                let mut best: Option<&Arc<Endpoint>> = None;
                for endpoint in endpoints.iter() {
                    if best.map_or(true, |b| endpoint.outstanding() < b.outstanding()) {
                        best = Some(endpoint);
                    }
                }
                best
            }
        }?;

        Some(EndpointGuard::new(chosen.clone()))
    }

    /// Replace the set; endpoints that stay keep their counters
    ///
    /// Returns the addresses that were removed.
    pub fn replace(&self, addresses: &[String]) -> Result<Vec<String>> {
        let addresses: Vec<String> = addresses
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(|a| with_port(a, self.upstream_port))
            .collect();

        if addresses.is_empty() {
            return Err(BalancerError::MalformedInput(
                "endpoint list is empty".to_string(),
            ));
        }

        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        let mut existing: HashMap<String, Arc<Endpoint>> = endpoints
            .drain(..)
            .map(|e| (e.address.clone(), e))
            .collect();

        *endpoints = addresses
            .iter()
            .map(|a| {
                existing
                    .remove(a)
                    .unwrap_or_else(|| Arc::new(Endpoint::new(a.clone())))
            })
            .collect();

        let removed: Vec<String> = existing.into_keys().collect();
        debug!(
            endpoints = endpoints.len(),
            removed = removed.len(),
            "Endpoint set replaced"
        );
        Ok(removed)
    }
}

/// Append the default port to an address that has none
pub fn with_port(address: &str, port: u16) -> String {
    let address = address.trim();
    let has_port = if let Some(rest) = address.strip_prefix('[') {
        rest.contains("]:")
    } else {
        address.matches(':').count() == 1
    };

    if has_port {
        address.to_string()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("10.0.0.1", 3000), "10.0.0.1:3000");
        assert_eq!(with_port("10.0.0.1:8080", 3000), "10.0.0.1:8080");
        assert_eq!(with_port("app-1.local", 3000), "app-1.local:3000");
        assert_eq!(with_port("fd00::1", 3000), "[fd00::1]:3000");
        assert_eq!(with_port("[fd00::1]:9000", 3000), "[fd00::1]:9000");
    }

    #[test]
    fn test_algorithm_parse_and_auto() {
        assert_eq!("none".parse::<LbAlgorithm>().unwrap(), LbAlgorithm::None);
        assert_eq!(
            "LEAST_REQUEST".parse::<LbAlgorithm>().unwrap(),
            LbAlgorithm::LeastRequest
        );
        assert!("round_robin".parse::<LbAlgorithm>().is_err());

        assert_eq!(LbAlgorithm::auto(1), LbAlgorithm::None);
        assert_eq!(LbAlgorithm::auto(2), LbAlgorithm::LeastRequest);
    }

    #[test]
    fn test_none_always_picks_first() {
        let set = EndpointSet::new(&addrs(&["a", "b"]), Some(LbAlgorithm::None), 3000);
        let _held = set.select().unwrap();
        assert_eq!(set.select().unwrap().address(), "a:3000");
    }

    #[test]
    fn test_least_request_prefers_idle_and_first_on_tie() {
        let set = EndpointSet::new(&addrs(&["a", "b", "c"]), None, 3000);
        assert_eq!(set.algorithm(), LbAlgorithm::LeastRequest);

        let first = set.select().unwrap();
        assert_eq!(first.address(), "a:3000");
        let second = set.select().unwrap();
        assert_eq!(second.address(), "b:3000");
        let third = set.select().unwrap();
        assert_eq!(third.address(), "c:3000");

        drop(second);
        assert_eq!(set.select().unwrap().address(), "b:3000");
    }

    #[test]
    fn test_guard_drop_releases_counter() {
        let set = EndpointSet::new(&addrs(&["a"]), None, 3000);
        {
            let _g1 = set.select().unwrap();
            let _g2 = set.select().unwrap();
            assert_eq!(set.snapshot(), vec![("a:3000".to_string(), 2)]);
        }
        assert_eq!(set.snapshot(), vec![("a:3000".to_string(), 0)]);
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let endpoint = Endpoint::new("a:3000");
        endpoint.release();
        assert_eq!(endpoint.outstanding(), 0);
    }

    #[test]
    fn test_empty_set_selects_nothing() {
        let set = EndpointSet::new(&[], None, 3000);
        assert!(set.select().is_none());
    }

    #[test]
    fn test_replace_preserves_counters_of_kept_endpoints() {
        let set = EndpointSet::new(&addrs(&["a", "b"]), None, 3000);
        let held = set.select().unwrap();
        assert_eq!(held.address(), "a:3000");

        let removed = set.replace(&addrs(&["c", "a:3000"])).unwrap();
        assert_eq!(removed, vec!["b:3000".to_string()]);
        assert_eq!(
            set.snapshot(),
            vec![("c:3000".to_string(), 0), ("a:3000".to_string(), 1)]
        );

        drop(held);
        assert_eq!(set.snapshot()[1], ("a:3000".to_string(), 0));
    }

    #[test]
    fn test_empty_replace_keeps_current_set() {
        let set = EndpointSet::new(&addrs(&["a"]), None, 3000);
        assert!(set.replace(&addrs(&["", " "])).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_guard_on_removed_endpoint_is_harmless() {
        let set = EndpointSet::new(&addrs(&["a"]), None, 3000);
        let held = set.select().unwrap();
        set.replace(&addrs(&["b"])).unwrap();
        drop(held);
        assert_eq!(set.snapshot(), vec![("b:3000".to_string(), 0)]);
    }
}
