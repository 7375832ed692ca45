//! Allocation strategies
//!
//! Two strategies sit behind one trait: congestion pricing, driven by
//! per-pod request counts, and solved CPU shares, driven by per-pod
//! utilization sampled on every host.

pub mod pricing;
pub mod selection;
pub mod solver;

pub use pricing::{PriceVector, PricingStrategy, DEFAULT_EPSILON};
pub use selection::{optimal_assignments, LbAssignment};
pub use solver::{SharePlan, SolverClient, SolverStrategy};

use crate::error::Result;
use crate::models::{NodeUtilization, PodLoads};
use crate::topology::Topology;
use async_trait::async_trait;

/// Input gathered for one allocation round
#[derive(Debug, Clone)]
pub enum Signals {
    PodLoads(PodLoads),
    Utilizations(Vec<NodeUtilization>),
}

/// Result of one allocation round
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    Prices(PriceVector),
    Shares(SharePlan),
    /// Nothing to apply this round; previous allocation stays in force
    Skipped(String),
}

#[async_trait]
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn allocate(&mut self, topology: &Topology, signals: &Signals) -> Result<Allocation>;
}
