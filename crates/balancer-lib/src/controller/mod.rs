//! Control plane
//!
//! The controller runs in one of two modes. In pricing mode it collects
//! load reports over HTTP, closes a round once every pod has reported and
//! pushes the cheapest endpoint to each load balancer. In solver mode it
//! samples CPU utilization from the node agents on a fixed interval and
//! applies the share plan returned by the optimizer.

pub mod ingress;
pub mod notifier;
pub mod pricing_loop;
pub mod round;
pub mod shares_loop;

pub use ingress::{ingress_router, IngressState, DEFAULT_INGRESS_QUEUE};
pub use notifier::{LbNotifier, NotifyResult};
pub use pricing_loop::{PricingController, PricingRound};
pub use round::{RoundCollector, RoundOutcome, RoundState};
pub use shares_loop::{links_from_topology, AgentLink, SharesController, SharesRound};

use crate::error::BalancerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    #[default]
    Pricing,
    Solver,
}

impl ControllerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerMode::Pricing => "pricing",
            ControllerMode::Solver => "solver",
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerMode {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pricing" => Ok(ControllerMode::Pricing),
            "solver" => Ok(ControllerMode::Solver),
            other => Err(BalancerError::Config(format!(
                "unknown controller mode {:?}, expected pricing or solver",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("pricing".parse::<ControllerMode>().unwrap(), ControllerMode::Pricing);
        assert_eq!(" Solver ".parse::<ControllerMode>().unwrap(), ControllerMode::Solver);
        assert!("auction".parse::<ControllerMode>().is_err());
        assert_eq!(ControllerMode::default().to_string(), "pricing");
    }
}
