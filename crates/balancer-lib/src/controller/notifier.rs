//! Pushes the chosen endpoint to every load balancer

use crate::allocation::LbAssignment;
use crate::error::{BalancerError, Result};
use crate::observability::{BalancerMetrics, StructuredLogger};
use crate::router::ENDPOINTS_PARAM;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyResult {
    pub lb_name: String,
    pub endpoint: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl NotifyResult {
    pub fn is_success(&self) -> bool {
        self.status == Some(StatusCode::OK.as_u16())
    }
}

#[derive(Clone)]
pub struct LbNotifier {
    http: reqwest::Client,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
}

impl LbNotifier {
    pub fn new(request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("controller"),
        })
    }

    /// `GET http://<lb>/?endpoints=<pod-ip>`
    pub async fn notify(&self, assignment: &LbAssignment) -> Result<StatusCode> {
        let url = lb_url(&assignment.lb_address);
        let response = self
            .http
            .get(&url)
            .query(&[(ENDPOINTS_PARAM, assignment.pod_address.as_str())])
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await
            .map_err(|e| BalancerError::peer(&assignment.lb_address, e))?;
        Ok(response.status())
    }

    /// Notify every load balancer concurrently and wait for all of them
    ///
    /// Failures are logged and counted; nothing is retried or cancelled.
    pub async fn notify_all(&self, assignments: Vec<LbAssignment>) -> Vec<NotifyResult> {
        let this = Arc::new(self.clone());
        let mut tasks = JoinSet::new();

        for assignment in assignments {
            let this = this.clone();
            tasks.spawn(async move {
                let (status, error) = match this.notify(&assignment).await {
                    Ok(status) => (Some(status.as_u16()), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                NotifyResult {
                    lb_name: assignment.lb_name,
                    endpoint: assignment.pod_address,
                    status,
                    error,
                }
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    let ok = result.is_success();
                    if !ok {
                        warn!(
                            lb = %result.lb_name,
                            status = ?result.status,
                            error = ?result.error,
                            "Load balancer did not accept endpoint"
                        );
                    }
                    self.metrics.inc_lb_notifications(ok);
                    self.logger
                        .log_lb_notified(&result.lb_name, &result.endpoint, ok);
                    results.push(result);
                }
                Err(e) => {
                    self.metrics.inc_lb_notifications(false);
                    warn!(error = %e, "Notification task failed");
                }
            }
        }

        results.sort_by(|a, b| a.lb_name.cmp(&b.lb_name));
        results
    }
}

fn lb_url(address: &str) -> String {
    let base = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    }
}
