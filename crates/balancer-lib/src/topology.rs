//! Static fleet topology
//!
//! Hosts, pods and load balancers are supplied once at startup as JSON
//! arrays (environment variables `HOSTS`, `PODS` and `LBS`) and never change
//! afterwards. List order is significant: the position of a load balancer
//! is its application index and the position of a host is its host index
//! when talking to the solver.

use crate::error::{BalancerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const HOSTS_ENV: &str = "HOSTS";
pub const PODS_ENV: &str = "PODS";
pub const LBS_ENV: &str = "LBS";

/// A node with a fixed integer load capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub name: String,
    pub load_capacity: i64,
    #[serde(default)]
    pub pod_names: Vec<String>,
    /// `host:port` of the node agent running on this host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_address: Option<String>,
}

/// An addressable workload owned by one host and one load balancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    pub ip_address: String,
    pub host_name: String,
    pub lb_name: String,
    /// cgroup identifier registered with the node agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Per-application load balancer and its candidate pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub name: String,
    pub ip_address: String,
    #[serde(default)]
    pub pod_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    hosts: Vec<Host>,
    pods: Vec<Pod>,
    load_balancers: Vec<LoadBalancer>,
    host_index: HashMap<String, usize>,
    pod_index: HashMap<String, usize>,
    lb_index: HashMap<String, usize>,
}

impl Topology {
    /// Build a topology, rejecting duplicate names but not dangling references
    pub fn new(hosts: Vec<Host>, pods: Vec<Pod>, load_balancers: Vec<LoadBalancer>) -> Result<Self> {
        let host_index = index_by_name("host", hosts.iter().map(|h| h.name.as_str()))?;
        let pod_index = index_by_name("pod", pods.iter().map(|p| p.name.as_str()))?;
        let lb_index = index_by_name(
            "load balancer",
            load_balancers.iter().map(|lb| lb.name.as_str()),
        )?;

        Ok(Self {
            hosts,
            pods,
            load_balancers,
            host_index,
            pod_index,
            lb_index,
        })
    }

    /// Parse the three JSON arrays without consistency checks
    pub fn parse(hosts_json: &str, pods_json: &str, lbs_json: &str) -> Result<Self> {
        let hosts: Vec<Host> = serde_json::from_str(hosts_json)
            .map_err(|e| BalancerError::Topology(format!("invalid {}: {}", HOSTS_ENV, e)))?;
        let pods: Vec<Pod> = serde_json::from_str(pods_json)
            .map_err(|e| BalancerError::Topology(format!("invalid {}: {}", PODS_ENV, e)))?;
        let lbs: Vec<LoadBalancer> = serde_json::from_str(lbs_json)
            .map_err(|e| BalancerError::Topology(format!("invalid {}: {}", LBS_ENV, e)))?;

        Self::new(hosts, pods, lbs)
    }

    /// Parse and require a consistent topology
    pub fn from_json(hosts_json: &str, pods_json: &str, lbs_json: &str) -> Result<Self> {
        let topology = Self::parse(hosts_json, pods_json, lbs_json)?;
        let problems = topology.problems();
        if !problems.is_empty() {
            return Err(BalancerError::Topology(problems.join("; ")));
        }
        Ok(topology)
    }

    /// Load from the `HOSTS`, `PODS` and `LBS` environment variables
    pub fn from_env() -> Result<Self> {
        let read = |key: &str| {
            std::env::var(key)
                .map_err(|_| BalancerError::Topology(format!("{} is not set", key)))
        };
        Self::from_json(&read(HOSTS_ENV)?, &read(PODS_ENV)?, &read(LBS_ENV)?)
    }

    /// Dangling references between hosts, pods and load balancers
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for host in &self.hosts {
            for pod_name in &host.pod_names {
                match self.pod(pod_name) {
                    None => problems.push(format!(
                        "host {} lists unknown pod {}",
                        host.name, pod_name
                    )),
                    Some(pod) if pod.host_name != host.name => problems.push(format!(
                        "host {} lists pod {} owned by host {}",
                        host.name, pod_name, pod.host_name
                    )),
                    Some(_) => {}
                }
            }
        }

        for pod in &self.pods {
            if self.host(&pod.host_name).is_none() {
                problems.push(format!(
                    "pod {} references unknown host {}",
                    pod.name, pod.host_name
                ));
            }
            if self.load_balancer(&pod.lb_name).is_none() {
                problems.push(format!(
                    "pod {} references unknown load balancer {}",
                    pod.name, pod.lb_name
                ));
            }
        }

        for lb in &self.load_balancers {
            for pod_name in &lb.pod_names {
                if self.pod(pod_name).is_none() {
                    problems.push(format!(
                        "load balancer {} lists unknown pod {}",
                        lb.name, pod_name
                    ));
                }
            }
        }

        problems
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn load_balancers(&self) -> &[LoadBalancer] {
        &self.load_balancers
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.host_index.get(name).map(|&i| &self.hosts[i])
    }

    pub fn pod(&self, name: &str) -> Option<&Pod> {
        self.pod_index.get(name).map(|&i| &self.pods[i])
    }

    pub fn load_balancer(&self, name: &str) -> Option<&LoadBalancer> {
        self.lb_index.get(name).map(|&i| &self.load_balancers[i])
    }

    /// Position of a host in topology order
    pub fn host_position(&self, name: &str) -> Option<usize> {
        self.host_index.get(name).copied()
    }

    /// Application index of a load balancer
    pub fn app_index(&self, lb_name: &str) -> Option<usize> {
        self.lb_index.get(lb_name).copied()
    }

    /// The pod of `lb` that runs on `host_name`, in the load balancer's order
    pub fn pod_on_host(&self, lb: &LoadBalancer, host_name: &str) -> Option<&Pod> {
        lb.pod_names
            .iter()
            .filter_map(|name| self.pod(name))
            .find(|pod| pod.host_name == host_name)
    }

    /// Pods registered on a host, as listed by the host
    pub fn pods_of_host<'a>(&'a self, host: &'a Host) -> impl Iterator<Item = &'a Pod> + 'a {
        host.pod_names.iter().filter_map(move |name| self.pod(name))
    }
}

fn index_by_name<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        if index.insert(name.to_string(), i).is_some() {
            return Err(BalancerError::Topology(format!(
                "duplicate {} name {}",
                kind, name
            )));
        }
    }
    Ok(index)
}


#[cfg(test)]
mod tests {
    use super::*;

    const HOSTS: &str = r#"[{"name":"minikube-m02","loadCapacity":100,"podNames":["app1-node1","app3-node1"],"agentAddress":"10.101.102.101:9988"}]"#;
    const PODS: &str = r#"[
        {"name":"app1-node1","ipAddress":"10.1.0.5","hostName":"minikube-m02","lbName":"lb-app1","uid":"pod1uid"},
        {"name":"app3-node1","ipAddress":"10.1.0.6","hostName":"minikube-m02","lbName":"lb-app3"}
    ]"#;
    const LBS: &str = r#"[
        {"name":"lb-app1","ipAddress":"10.101.101.201:3000","podNames":["app1-node1"]},
        {"name":"lb-app3","ipAddress":"10.101.101.203:3000","podNames":["app3-node1"]}
    ]"#;

    #[test]
    fn test_parse_topology_json() {
        let topology = Topology::from_json(HOSTS, PODS, LBS).unwrap();

        assert_eq!(topology.hosts().len(), 1);
        let host = topology.host("minikube-m02").unwrap();
        assert_eq!(host.load_capacity, 100);
        assert_eq!(host.agent_address.as_deref(), Some("10.101.102.101:9988"));

        let pod = topology.pod("app1-node1").unwrap();
        assert_eq!(pod.ip_address, "10.1.0.5");
        assert_eq!(pod.uid.as_deref(), Some("pod1uid"));
        assert_eq!(topology.pod("app3-node1").unwrap().uid, None);

        assert_eq!(topology.app_index("lb-app3"), Some(1));
        assert_eq!(topology.host_position("minikube-m02"), Some(0));
    }

    #[test]
    fn test_malformed_json_is_topology_error() {
        let err = Topology::from_json("[{", PODS, LBS).unwrap_err();
        assert!(matches!(err, BalancerError::Topology(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let hosts = format!(
            "[{},{}]",
            r#"{"name":"h1","loadCapacity":1}"#, r#"{"name":"h1","loadCapacity":2}"#
        );
        let err = Topology::parse(&hosts, "[]", "[]").unwrap_err();
        assert!(err.to_string().contains("duplicate host name h1"));
    }

    #[test]
    fn test_dangling_references_reported() {
        let pods = r#"[{"name":"p1","ipAddress":"10.0.0.1","hostName":"ghost","lbName":"lb1"}]"#;
        let topology = Topology::parse("[]", pods, "[]").unwrap();
        let problems = topology.problems();

        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("unknown host ghost"));
        assert!(problems[1].contains("unknown load balancer lb1"));
        assert!(Topology::from_json("[]", pods, "[]").is_err());
    }

    #[test]
    fn test_pod_on_host() {
        let topology = fixtures::three_hosts();
        let lb = topology.load_balancer("lb1").unwrap();

        assert_eq!(topology.pod_on_host(lb, "h2").unwrap().name, "a2");
        assert!(topology.pod_on_host(lb, "h9").is_none());
    }
}
