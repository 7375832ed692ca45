//! Load reports from a workload to the controller ingress

use crate::error::{BalancerError, Result};
use crate::observability::{BalancerMetrics, StructuredLogger};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ReportingConfig {
    /// Controller base URL, e.g. `http://10.101.101.101:3000`
    pub controller_url: String,
    /// Per-attempt timeout
    pub request_timeout: Duration,
    /// Attempts per round before the report is abandoned
    pub max_attempts: u32,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://10.101.101.101:3000".to_string(),
            request_timeout: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

impl ReportingConfig {
    pub fn with_controller(controller_url: impl Into<String>) -> Self {
        Self {
            controller_url: controller_url.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one round's report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32 },
}

pub struct ReportingClient {
    config: ReportingConfig,
    http: reqwest::Client,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
}

impl ReportingClient {
    pub fn new(config: ReportingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            config,
            http,
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("reporter"),
        })
    }

    pub fn config(&self) -> &ReportingConfig {
        &self.config
    }

    /// One attempt; any status other than 200 is a failure
    pub async fn report(&self, pod_name: &str, k: i64, a: i64) -> Result<String> {
        let response = self
            .http
            .get(&self.config.controller_url)
            .query(&[
                ("podname", pod_name.to_string()),
                ("k", k.to_string()),
                ("a", a.to_string()),
            ])
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await
            .map_err(|e| BalancerError::peer(&self.config.controller_url, e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            return Err(BalancerError::external(
                "controller",
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }
        Ok(body)
    }

    /// Retry without backoff until a 200 or the attempt budget runs out.
    /// Every attempt carries the same `k`.
    pub async fn report_with_retry(&self, pod_name: &str, k: i64, a: i64) -> ReportOutcome {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.report(pod_name, k, a).await {
                Ok(body) => {
                    self.metrics.inc_report_attempts(true);
                    debug!(pod = %pod_name, k, a, attempt, response = %body.trim(), "Report delivered");
                    return ReportOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    self.metrics.inc_report_attempts(false);
                    warn!(pod = %pod_name, k, attempt, error = %e, "Report attempt failed");
                }
            }
        }

        self.logger.log_report_abandoned(pod_name, k, max_attempts);
        ReportOutcome::Abandoned {
            attempts: max_attempts,
        }
    }
}
