//! Per-session pod registry

use super::protocol::parse_pod_uids;
use crate::error::Result;
use std::collections::BTreeMap;

/// Pod name to cgroup identifier, owned by one agent session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRegistry {
    pods: BTreeMap<String, String>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry from `pod:uid` entries
    ///
    /// Entries are parsed before anything changes, so a malformed message
    /// leaves the registry exactly as it was.
    pub fn replace(&mut self, entries: &[String]) -> Result<()> {
        let parsed = parse_pod_uids(entries)?;
        self.pods = parsed.into_iter().collect();
        Ok(())
    }

    pub fn uid(&self, pod_name: &str) -> Option<&str> {
        self.pods.get(pod_name).map(String::as_str)
    }

    /// Registered pods in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pods.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}
