//! Observability for the control plane
//!
//! Provides:
//! - Prometheus metrics (round latency, host prices, report and agent counters)
//! - Structured JSON logging of control-loop events with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for round and request latency (seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<BalancerMetricsInner> = OnceLock::new();

struct BalancerMetricsInner {
    rounds_total: IntCounter,
    rounds_abandoned_total: IntCounter,
    round_duration_seconds: Histogram,
    host_price: GaugeVec,
    reports_dropped_total: IntCounterVec,
    lb_notifications_total: IntCounterVec,
    agent_commands_total: IntCounterVec,
    solver_requests_total: IntCounterVec,
    endpoint_outstanding: IntGaugeVec,
    report_attempts_total: IntCounterVec,
}

impl BalancerMetricsInner {
    fn new() -> Self {
        Self {
            rounds_total: register_int_counter!(
                "fleet_balancer_rounds_total",
                "Allocation rounds completed"
            )
            .expect("Failed to register rounds_total"),

            rounds_abandoned_total: register_int_counter!(
                "fleet_balancer_rounds_abandoned_total",
                "Rounds abandoned because reporters were missing at the deadline"
            )
            .expect("Failed to register rounds_abandoned_total"),

            round_duration_seconds: register_histogram!(
                "fleet_balancer_round_duration_seconds",
                "Time from round start to allocation pushed",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register round_duration_seconds"),

            host_price: register_gauge_vec!(
                "fleet_balancer_host_price",
                "Current congestion price per host",
                &["host"]
            )
            .expect("Failed to register host_price"),

            reports_dropped_total: register_int_counter_vec!(
                "fleet_balancer_reports_dropped_total",
                "Load reports discarded by the controller",
                &["reason"]
            )
            .expect("Failed to register reports_dropped_total"),

            lb_notifications_total: register_int_counter_vec!(
                "fleet_balancer_lb_notifications_total",
                "Endpoint notifications sent to load balancers",
                &["result"]
            )
            .expect("Failed to register lb_notifications_total"),

            agent_commands_total: register_int_counter_vec!(
                "fleet_balancer_agent_commands_total",
                "Node agent protocol commands",
                &["command", "result"]
            )
            .expect("Failed to register agent_commands_total"),

            solver_requests_total: register_int_counter_vec!(
                "fleet_balancer_solver_requests_total",
                "Optimizer requests by outcome",
                &["result"]
            )
            .expect("Failed to register solver_requests_total"),

            endpoint_outstanding: register_int_gauge_vec!(
                "fleet_balancer_endpoint_outstanding_requests",
                "In-flight requests per load balancer endpoint",
                &["endpoint"]
            )
            .expect("Failed to register endpoint_outstanding"),

            report_attempts_total: register_int_counter_vec!(
                "fleet_balancer_report_attempts_total",
                "Load report attempts by outcome",
                &["result"]
            )
            .expect("Failed to register report_attempts_total"),
        }
    }
}

/// Handle to the process-wide metrics; clones share the same registry entries
#[derive(Clone)]
pub struct BalancerMetrics {
    _private: (),
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BalancerMetricsInner {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new)
    }

    pub fn inc_rounds(&self) {
        self.inner().rounds_total.inc();
    }

    pub fn inc_rounds_abandoned(&self) {
        self.inner().rounds_abandoned_total.inc();
    }

    pub fn observe_round_duration(&self, duration_secs: f64) {
        self.inner().round_duration_seconds.observe(duration_secs);
    }

    pub fn set_host_price(&self, host: &str, price: f64) {
        self.inner().host_price.with_label_values(&[host]).set(price);
    }

    /// `reason` is `unknown_pod`, `stale` or `malformed`
    pub fn inc_reports_dropped(&self, reason: &str) {
        self.inner()
            .reports_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_lb_notifications(&self, success: bool) {
        self.inner()
            .lb_notifications_total
            .with_label_values(&[result_label(success)])
            .inc();
    }

    pub fn inc_agent_commands(&self, command: &str, success: bool) {
        self.inner()
            .agent_commands_total
            .with_label_values(&[command, result_label(success)])
            .inc();
    }

    pub fn inc_solver_requests(&self, success: bool) {
        self.inner()
            .solver_requests_total
            .with_label_values(&[result_label(success)])
            .inc();
    }

    pub fn set_endpoint_outstanding(&self, endpoint: &str, outstanding: u64) {
        self.inner()
            .endpoint_outstanding
            .with_label_values(&[endpoint])
            .set(outstanding as i64);
    }

    /// Drop gauges of endpoints that left the set
    pub fn remove_endpoint(&self, endpoint: &str) {
        let _ = self
            .inner()
            .endpoint_outstanding
            .remove_label_values(&[endpoint]);
    }

    pub fn inc_report_attempts(&self, success: bool) {
        self.inner()
            .report_attempts_total
            .with_label_values(&[result_label(success)])
            .inc();
    }
}

fn result_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Structured logger for control-loop events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str, listen: &str) {
        info!(
            event = "component_started",
            component = %self.component,
            version = %version,
            listen = %listen,
            "Component started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "component_shutdown",
            component = %self.component,
            reason = %reason,
            "Component shutting down"
        );
    }

    pub fn log_round_closed(&self, round: u64, reporters: usize, total_load: i64) {
        info!(
            event = "round_closed",
            component = %self.component,
            round,
            reporters,
            total_load,
            "All reporters heard from, round closed"
        );
    }

    pub fn log_round_abandoned(&self, round: u64, missing: &[String]) {
        warn!(
            event = "round_abandoned",
            component = %self.component,
            round,
            missing = ?missing,
            "Round deadline passed, prices left unchanged"
        );
    }

    pub fn log_prices_updated(&self, round: u64, prices: &[(String, f64)]) {
        info!(
            event = "prices_updated",
            component = %self.component,
            round,
            prices = ?prices,
            "Host prices updated"
        );
    }

    pub fn log_lb_notified(&self, lb_name: &str, endpoint: &str, success: bool) {
        if success {
            info!(
                event = "lb_notified",
                component = %self.component,
                lb = %lb_name,
                endpoint = %endpoint,
                "Load balancer pointed at least priced pod"
            );
        } else {
            warn!(
                event = "lb_notify_failed",
                component = %self.component,
                lb = %lb_name,
                endpoint = %endpoint,
                "Load balancer notification failed"
            );
        }
    }

    pub fn log_shares_applied(&self, host: &str, pods: usize, success: bool) {
        if success {
            info!(
                event = "shares_applied",
                component = %self.component,
                host = %host,
                pods,
                "CPU shares applied"
            );
        } else {
            warn!(
                event = "shares_failed",
                component = %self.component,
                host = %host,
                pods,
                "CPU shares rejected by node agent"
            );
        }
    }

    pub fn log_report_abandoned(&self, pod: &str, k: i64, attempts: u32) {
        warn!(
            event = "report_abandoned",
            component = %self.component,
            pod = %pod,
            k,
            attempts,
            "Load report abandoned after final attempt"
        );
    }

    pub fn log_endpoints_replaced(&self, endpoints: &[String]) {
        info!(
            event = "endpoints_replaced",
            component = %self.component,
            endpoints = ?endpoints,
            "Endpoint set replaced"
        );
    }
}
