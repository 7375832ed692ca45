//! Error taxonomy for the control plane
//!
//! Steady-state loops never terminate on these errors. Only the
//! configuration family is fatal, and only at startup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BalancerError {
    /// Unparseable protocol message or query parameter
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unknown pod: {0}")]
    UnknownPod(String),

    #[error("Rejected cgroup identifier for pod {pod}: {uid:?}")]
    UnsafeCgroupId { pod: String, uid: String },

    /// Dial, read or write failure towards a peer
    #[error("Peer {peer} unavailable: {reason}")]
    PeerUnavailable { peer: String, reason: String },

    #[error("Peer {0} closed the connection")]
    PeerClosed(String),

    /// cgroup write failure while applying a batch
    #[error("Failed to apply resource control at {path}: {source}")]
    ResourceApplication {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read usage counter at {path}: {reason}")]
    UsageRead { path: String, reason: String },

    /// Non-success answer from the solver or a load balancer
    #[error("External service {service} failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BalancerError {
    /// Whether the error may terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, BalancerError::Topology(_) | BalancerError::Config(_))
    }

    pub fn peer(peer: impl Into<String>, reason: impl ToString) -> Self {
        BalancerError::PeerUnavailable {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, reason: impl ToString) -> Self {
        BalancerError::ExternalService {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BalancerError>;
