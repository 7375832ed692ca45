//! HTTP ingress for workload load reports

use crate::models::LoadReport;
use crate::observability::BalancerMetrics;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reports waiting for the round collector
pub const DEFAULT_INGRESS_QUEUE: usize = 1024;

#[derive(Clone)]
pub struct IngressState {
    tx: mpsc::Sender<LoadReport>,
    metrics: BalancerMetrics,
}

impl IngressState {
    pub fn new(tx: mpsc::Sender<LoadReport>) -> Self {
        Self {
            tx,
            metrics: BalancerMetrics::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    #[serde(default)]
    podname: String,
    #[serde(default)]
    k: String,
    #[serde(default)]
    a: String,
}

impl ReportParams {
    /// `k` and `a` must both be integers
    pub fn into_report(self) -> Result<LoadReport, String> {
        let k = self
            .k
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid k {:?}: {}", self.k, e))?;
        let a = self
            .a
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid a {:?}: {}", self.a, e))?;

        Ok(LoadReport {
            pod_name: self.podname,
            k,
            a,
        })
    }
}

pub fn ack_message(report: &LoadReport) -> String {
    format!(
        "Enqueued req for processing [for {} w/ k={} & a={}]",
        report.pod_name, report.k, report.a
    )
}

async fn ingest(
    State(state): State<IngressState>,
    Query(params): Query<ReportParams>,
) -> impl IntoResponse {
    let report = match params.into_report() {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "Malformed load report");
            state.metrics.inc_reports_dropped("malformed");
            return (StatusCode::BAD_REQUEST, e);
        }
    };

    let ack = ack_message(&report);
    if state.tx.send(report).await.is_err() {
        warn!("Round collector is gone, rejecting report");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Controller shutting down".to_string(),
        );
    }

    (StatusCode::OK, ack)
}

/// `GET /?podname=&k=&a=`
pub fn ingress_router<S>(state: IngressState) -> Router<S> {
    Router::new().route("/", get(ingest)).with_state(state)
}
