//! Load balancer commands

use anyhow::{Context, Result};
use balancer_lib::router::ENDPOINTS_PARAM;
use colored::Colorize;
use std::time::Duration;

use crate::output::print_success;

fn lb_url(lb: &str) -> String {
    if lb.starts_with("http://") || lb.starts_with("https://") {
        lb.to_string()
    } else {
        format!("http://{}", lb)
    }
}

/// Replace the endpoint set the same way the controller does
pub async fn set_endpoints(lb: &str, endpoints: &[String]) -> Result<()> {
    if endpoints.is_empty() {
        anyhow::bail!("at least one endpoint is required");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(lb_url(lb))
        .query(&[(ENDPOINTS_PARAM, endpoints.join(","))])
        .send()
        .await
        .with_context(|| format!("Failed to reach load balancer at {}", lb))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("Load balancer error ({}): {}", status, body);
    }

    print_success(&format!("{} {}", lb.cyan(), body));
    Ok(())
}
