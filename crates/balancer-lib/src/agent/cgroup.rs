//! cgroup v1 CPU control
//!
//! Shares are written to `<root>/<uid>/cpu.shares` and cumulative usage is
//! read from `<root>/<uid>/cpuacct.usage` (nanoseconds).

use super::protocol::Response;
use crate::error::{BalancerError, Result};
use crate::models::PodUtilization;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

/// Burstable pods on a kubelet with the cgroupfs driver
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/cpu/kubepods/burstable";

pub const CPU_SHARES_FILE: &str = "cpu.shares";
pub const CPU_USAGE_FILE: &str = "cpuacct.usage";

/// Window between the two usage samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Seam between the protocol session and the cgroup filesystem
#[async_trait]
pub trait CpuController: Send + Sync {
    async fn write_shares(&self, pod_name: &str, uid: &str, shares: i64) -> Result<()>;

    /// Cumulative CPU time in nanoseconds
    async fn read_usage(&self, pod_name: &str, uid: &str) -> Result<u64>;
}

/// Controller backed by the cgroup v1 `cpu,cpuacct` hierarchy
#[derive(Debug, Clone)]
pub struct CgroupCpuController {
    cgroup_root: PathBuf,
}

impl Default for CgroupCpuController {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_ROOT)
    }
}

impl CgroupCpuController {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Directory of a pod's cgroup; the uid must be a single plain path segment
    pub fn pod_dir(&self, pod_name: &str, uid: &str) -> Result<PathBuf> {
        let mut components = Path::new(uid).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !uid.contains('/') => {
                Ok(self.cgroup_root.join(uid))
            }
            _ => Err(BalancerError::UnsafeCgroupId {
                pod: pod_name.to_string(),
                uid: uid.to_string(),
            }),
        }
    }
}

#[async_trait]
impl CpuController for CgroupCpuController {
    async fn write_shares(&self, pod_name: &str, uid: &str, shares: i64) -> Result<()> {
        let path = self.pod_dir(pod_name, uid)?.join(CPU_SHARES_FILE);
        debug!(pod = %pod_name, path = %path.display(), shares, "Writing cpu shares");

        fs::write(&path, shares.to_string())
            .await
            .map_err(|source| BalancerError::ResourceApplication {
                path: path.display().to_string(),
                source,
            })
    }

    async fn read_usage(&self, pod_name: &str, uid: &str) -> Result<u64> {
        let path = self.pod_dir(pod_name, uid)?.join(CPU_USAGE_FILE);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| BalancerError::UsageRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        content.trim().parse().map_err(|e| BalancerError::UsageRead {
            path: path.display().to_string(),
            reason: format!("{}", e),
        })
    }
}

/// Percentage of one CPU used over the window
pub fn utilization_percent(initial: u64, r#final: u64, elapsed_ns: u128) -> f64 {
    if elapsed_ns == 0 {
        return 0.0;
    }
    r#final.saturating_sub(initial) as f64 / elapsed_ns as f64 * 100.0
}

/// Sample every pod twice, `interval` apart, and report per-pod utilization
///
/// Pods whose counter cannot be read either time get the sentinel value.
pub async fn sample_utilizations<'a, C, I>(
    controller: &C,
    pods: I,
    interval: Duration,
) -> Vec<PodUtilization>
where
    C: CpuController + ?Sized,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pods: Vec<(&str, &str)> = pods.into_iter().collect();

    let mut initial = Vec::with_capacity(pods.len());
    for (pod, uid) in &pods {
        initial.push(controller.read_usage(pod, uid).await);
    }
    let start = Instant::now();

    tokio::time::sleep(interval).await;

    let mut final_usage = Vec::with_capacity(pods.len());
    for (pod, uid) in &pods {
        final_usage.push(controller.read_usage(pod, uid).await);
    }
    let elapsed_ns = start.elapsed().as_nanos();

    pods.iter()
        .zip(initial.into_iter().zip(final_usage))
        .map(|((pod, _), sample)| match sample {
            (Ok(before), Ok(after)) => {
                PodUtilization::new(*pod, utilization_percent(before, after, elapsed_ns))
            }
            (Err(e), _) | (_, Err(e)) => {
                debug!(pod = %pod, error = %e, "Usage counter unreadable");
                Response::unreadable(pod)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_percent() {
        let pct = utilization_percent(1_000_000, 1_100_000, 100_000_000);
        assert!((pct - 0.1).abs() < 1e-9);
        assert_eq!(utilization_percent(5, 1, 100), 0.0);
        assert_eq!(utilization_percent(1, 5, 0), 0.0);
    }

    #[test]
    fn test_pod_dir_rejects_traversal() {
        let controller = CgroupCpuController::new("/cg");
        assert_eq!(
            controller.pod_dir("p", "pod-1234").unwrap(),
            PathBuf::from("/cg/pod-1234")
        );
        for uid in ["..", "../etc", "a/b", "/abs", "", "."] {
            assert!(
                matches!(
                    controller.pod_dir("p", uid),
                    Err(BalancerError::UnsafeCgroupId { .. })
                ),
                "uid {:?} accepted",
                uid
            );
        }
    }
}
