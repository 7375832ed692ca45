//! Shared library for the fleet balancer
//!
//! This crate provides the core functionality for:
//! - Static fleet topology
//! - Load reporting from workloads
//! - Congestion pricing and solved CPU-share allocation
//! - The per-application load balancer
//! - The node agent and its line protocol
//! - Health checks and observability

pub mod agent;
pub mod allocation;
pub mod api;
pub mod controller;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reporting;
pub mod router;
pub mod topology;

pub use error::{BalancerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{BalancerMetrics, StructuredLogger};
pub use topology::{Host, LoadBalancer, Pod, Topology};
