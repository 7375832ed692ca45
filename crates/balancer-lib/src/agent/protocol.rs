//! Node agent line protocol
//!
//! Every message is one line: a command word followed by space separated
//! `name:value` pairs. The agent answers each line with exactly one line.

use crate::error::{BalancerError, Result};
use crate::models::{PodUtilization, UTILIZATION_SENTINEL};
use std::fmt;

pub const UPDATE_PODS: &str = "updatePods";
pub const APPLY_CPU_SHARES: &str = "applyCPUShares";
pub const GET_CPU_UTILIZATIONS: &str = "getCPUUtilizations";

pub const SUCCESS: &str = "Success";
pub const FAILURE: &str = "Failure";
pub const UNKNOWN_MESSAGE: &str = "Unknown message type";
pub const UTILS_PREFIX: &str = "utils:";

/// A request line split into its command and raw arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    UpdatePods(Vec<String>),
    ApplyCpuShares(Vec<String>),
    GetCpuUtilizations,
    Unknown(String),
}

impl Request {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches('\r');
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let args: Vec<String> = words.map(str::to_string).collect();

        match command {
            UPDATE_PODS => Request::UpdatePods(args),
            APPLY_CPU_SHARES => Request::ApplyCpuShares(args),
            GET_CPU_UTILIZATIONS => Request::GetCpuUtilizations,
            _ => Request::Unknown(line.to_string()),
        }
    }
}

/// Split `name:value` on its single colon
fn split_pair(entry: &str) -> Result<(&str, &str)> {
    let mut parts = entry.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(value), None) if !name.is_empty() => Ok((name, value)),
        _ => Err(BalancerError::MalformedInput(format!(
            "expected name:value, got {:?}",
            entry
        ))),
    }
}

/// Parse `pod:uid` entries; any malformed entry rejects the whole message
pub fn parse_pod_uids(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|entry| {
            let (pod, uid) = split_pair(entry)?;
            Ok((pod.to_string(), uid.to_string()))
        })
        .collect()
}

/// Parse `pod:share` entries; shares are decimals truncated toward zero
pub fn parse_pod_shares(args: &[String]) -> Result<Vec<(String, i64)>> {
    args.iter()
        .map(|entry| {
            let (pod, raw) = split_pair(entry)?;
            let share: f64 = raw.parse().map_err(|_| {
                BalancerError::MalformedInput(format!("share for {} is not a number: {:?}", pod, raw))
            })?;
            if !share.is_finite() {
                return Err(BalancerError::MalformedInput(format!(
                    "share for {} is not finite",
                    pod
                )));
            }
            Ok((pod.to_string(), share.trunc() as i64))
        })
        .collect()
}

/// One response line
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success,
    Failure,
    Utilizations(Vec<PodUtilization>),
    UnknownMessage,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success => f.write_str(SUCCESS),
            Response::Failure => f.write_str(FAILURE),
            Response::UnknownMessage => f.write_str(UNKNOWN_MESSAGE),
            Response::Utilizations(utils) => {
                f.write_str(UTILS_PREFIX)?;
                for util in utils {
                    write!(f, " {}:{:.6}", util.pod_name, util.percent)?;
                }
                Ok(())
            }
        }
    }
}

impl Response {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line {
            SUCCESS => return Ok(Response::Success),
            FAILURE => return Ok(Response::Failure),
            UNKNOWN_MESSAGE => return Ok(Response::UnknownMessage),
            _ => {}
        }

        let Some(rest) = line.strip_prefix(UTILS_PREFIX) else {
            return Err(BalancerError::MalformedInput(format!(
                "unexpected agent response {:?}",
                line
            )));
        };

        let utils = rest
            .split_whitespace()
            .map(|entry| {
                let (pod, raw) = split_pair(entry)?;
                let percent = raw.parse().map_err(|_| {
                    BalancerError::MalformedInput(format!("utilization for {} is {:?}", pod, raw))
                })?;
                Ok(PodUtilization::new(pod, percent))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Response::Utilizations(utils))
    }

    /// Sentinel entry for a pod whose usage could not be sampled
    pub fn unreadable(pod_name: &str) -> PodUtilization {
        PodUtilization::new(pod_name, UTILIZATION_SENTINEL)
    }
}
