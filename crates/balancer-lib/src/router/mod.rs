//! Per-application load balancer
//!
//! Forwards every request to one endpoint picked by the configured
//! algorithm. The controller repoints it with `?endpoints=a,b`.

mod endpoints;
mod proxy;


pub use endpoints::{
    with_port, Endpoint, EndpointGuard, EndpointSet, LbAlgorithm, DEFAULT_UPSTREAM_PORT,
};
pub use proxy::{create_router, endpoints_param, RouterState, ENDPOINTS_PARAM, MAX_BODY_BYTES};
