//! Round collection
//!
//! The collector owns the receiving end of the ingress channel. A round
//! starts with every known pod unseen and closes once each of them has
//! reported at least once. Later reports from the same pod overwrite its
//! sample without advancing the round.

use crate::models::{LoadReport, LoadSample, PodLoads};
use crate::observability::BalancerMetrics;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Samples of one round; `None` means not heard from yet
#[derive(Debug, Clone, Default)]
pub struct RoundState {
    samples: BTreeMap<String, Option<LoadSample>>,
    heard: usize,
}

impl RoundState {
    pub fn new<'a>(pods: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            samples: pods.into_iter().map(|p| (p.to_string(), None)).collect(),
            heard: 0,
        }
    }

    pub fn expects(&self, pod_name: &str) -> bool {
        self.samples.contains_key(pod_name)
    }

    /// Store a sample; returns false for a pod outside the round
    pub fn record(&mut self, pod_name: &str, sample: LoadSample) -> bool {
        let Some(slot) = self.samples.get_mut(pod_name) else {
            return false;
        };
        if slot.is_none() {
            self.heard += 1;
        }
        *slot = Some(sample);
        true
    }

    pub fn heard(&self) -> usize {
        self.heard
    }

    pub fn is_complete(&self) -> bool {
        self.heard == self.samples.len()
    }

    pub fn missing(&self) -> Vec<String> {
        self.samples
            .iter()
            .filter(|(_, s)| s.is_none())
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = (&str, LoadSample)> {
        self.samples
            .iter()
            .filter_map(|(p, s)| s.map(|s| (p.as_str(), s)))
    }

    /// Latest request count per pod that reported
    pub fn loads(&self) -> PodLoads {
        self.samples().map(|(p, s)| (p.to_string(), s.a)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Complete(PodLoads),
    /// Deadline passed with these pods still unseen
    TimedOut { missing: Vec<String> },
    /// The ingress side of the channel is gone
    Closed,
}

pub struct RoundCollector {
    rx: mpsc::Receiver<LoadReport>,
    pods: Vec<String>,
    last_k: HashMap<String, i64>,
    round_timeout: Option<Duration>,
    metrics: BalancerMetrics,
}

impl RoundCollector {
    pub fn new(
        rx: mpsc::Receiver<LoadReport>,
        pods: impl IntoIterator<Item = String>,
        round_timeout: Option<Duration>,
    ) -> Self {
        Self {
            rx,
            pods: pods.into_iter().collect(),
            last_k: HashMap::new(),
            round_timeout,
            metrics: BalancerMetrics::new(),
        }
    }

    pub fn expected(&self) -> &[String] {
        &self.pods
    }

    /// Last round marker consumed for a pod
    pub fn last_k(&self, pod_name: &str) -> Option<i64> {
        self.last_k.get(pod_name).copied()
    }

    /// Wait until every known pod has reported once
    pub async fn next_round(&mut self) -> RoundOutcome {
        let mut state = RoundState::new(self.pods.iter().map(String::as_str));
        let deadline = self.round_timeout.map(|t| Instant::now() + t);

        while !state.is_complete() {
            let received = match deadline {
                Some(deadline) => match timeout_at(deadline, self.rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        return RoundOutcome::TimedOut {
                            missing: state.missing(),
                        }
                    }
                },
                None => self.rx.recv().await,
            };

            let Some(report) = received else {
                return RoundOutcome::Closed;
            };
            self.accept(&mut state, report);
        }

        for (pod, sample) in state.samples() {
            self.last_k.insert(pod.to_string(), sample.k);
        }
        RoundOutcome::Complete(state.loads())
    }

    fn accept(&self, state: &mut RoundState, report: LoadReport) {
        if !state.expects(&report.pod_name) {
            warn!(pod = %report.pod_name, k = report.k, a = report.a, "Report from unknown pod ignored");
            self.metrics.inc_reports_dropped("unknown_pod");
            return;
        }

        if let Some(&consumed) = self.last_k.get(&report.pod_name) {
            if report.k <= consumed {
                debug!(pod = %report.pod_name, k = report.k, consumed, "Stale report ignored");
                self.metrics.inc_reports_dropped("stale");
                return;
            }
        }

        state.record(
            &report.pod_name,
            LoadSample {
                k: report.k,
                a: report.a,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pod: &str, k: i64, a: i64) -> LoadReport {
        LoadReport {
            pod_name: pod.to_string(),
            k,
            a,
        }
    }

    fn collector(pods: &[&str], timeout: Option<Duration>) -> (mpsc::Sender<LoadReport>, RoundCollector) {
        let (tx, rx) = mpsc::channel(64);
        let collector = RoundCollector::new(rx, pods.iter().map(|p| p.to_string()), timeout);
        (tx, collector)
    }

    #[test]
    fn test_duplicates_overwrite_without_closing_round() {
        let mut state = RoundState::new(["p1", "p2"]);
        state.record("p1", LoadSample { k: 1, a: 10 });
        state.record("p1", LoadSample { k: 1, a: 12 });

        assert_eq!(state.heard(), 1);
        assert!(!state.is_complete());
        assert_eq!(state.missing(), vec!["p2".to_string()]);

        state.record("p2", LoadSample { k: 1, a: 3 });
        assert!(state.is_complete());
        assert_eq!(state.loads().get("p1"), Some(&12));
    }

    #[tokio::test]
    async fn test_round_closes_when_every_pod_reported() {
        let (tx, mut collector) = collector(&["p1", "p2"], None);

        tx.send(report("p1", 100, 30)).await.unwrap();
        tx.send(report("ghost", 100, 99)).await.unwrap();
        tx.send(report("p1", 100, 31)).await.unwrap();
        tx.send(report("p2", 100, 20)).await.unwrap();

        let outcome = collector.next_round().await;
        let expected: PodLoads = [("p1".to_string(), 31), ("p2".to_string(), 20)].into();
        assert_eq!(outcome, RoundOutcome::Complete(expected));
        assert_eq!(collector.last_k("p1"), Some(100));
    }

    #[tokio::test]
    async fn test_round_waits_for_missing_pod() {
        let (tx, mut collector) = collector(&["p1", "p2"], None);
        tx.send(report("p1", 1, 1)).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), collector.next_round()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_stale_retries_do_not_count_for_next_round() {
        let (tx, mut collector) = collector(&["p1", "p2"], None);

        tx.send(report("p1", 100, 5)).await.unwrap();
        tx.send(report("p2", 100, 6)).await.unwrap();
        assert!(matches!(collector.next_round().await, RoundOutcome::Complete(_)));

        // Late retry of round 100 must not satisfy the next round
        tx.send(report("p1", 100, 5)).await.unwrap();
        tx.send(report("p2", 200, 7)).await.unwrap();
        tx.send(report("p1", 200, 8)).await.unwrap();

        let RoundOutcome::Complete(loads) = collector.next_round().await else {
            panic!("round should close");
        };
        assert_eq!(loads.get("p1"), Some(&8));
        assert_eq!(collector.last_k("p2"), Some(200));
    }

    #[tokio::test]
    async fn test_round_timeout_reports_missing() {
        let (tx, mut collector) = collector(&["p1", "p2"], Some(Duration::from_millis(30)));
        tx.send(report("p2", 1, 1)).await.unwrap();

        assert_eq!(
            collector.next_round().await,
            RoundOutcome::TimedOut {
                missing: vec!["p1".to_string()]
            }
        );
        assert_eq!(collector.last_k("p2"), None);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_collection() {
        let (tx, mut collector) = collector(&["p1"], None);
        drop(tx);
        assert_eq!(collector.next_round().await, RoundOutcome::Closed);
    }
}
