//! Send one load report to the controller ingress

use anyhow::Result;
use balancer_lib::reporting::{round_marker, ReportOutcome, ReportingClient, ReportingConfig};

use crate::output::{print_error, print_success};

pub async fn send_report(controller: &str, pod: &str, count: i64, k: Option<i64>) -> Result<()> {
    let client = ReportingClient::new(ReportingConfig::with_controller(controller))?;
    let k = k.unwrap_or_else(round_marker);

    match client.report_with_retry(pod, k, count).await {
        ReportOutcome::Delivered { attempts } => {
            print_success(&format!(
                "Report for {} (k={}, a={}) delivered after {} attempt(s)",
                pod, k, count, attempts
            ));
            Ok(())
        }
        ReportOutcome::Abandoned { attempts } => {
            print_error(&format!(
                "Report for {} abandoned after {} attempt(s)",
                pod, attempts
            ));
            anyhow::bail!("controller did not accept the report")
        }
    }
}
