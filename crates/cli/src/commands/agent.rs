//! Node agent commands over the line protocol

use anyhow::{Context, Result};
use balancer_lib::agent::{parse_pod_shares, parse_pod_uids, NodeAgentClient};
use colored::Colorize;
use tabled::Tabled;

use crate::output::{color_utilization, print_error, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct UtilizationRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "CPU %")]
    percent: String,
}

async fn connect(addr: &str) -> Result<NodeAgentClient> {
    let mut client = NodeAgentClient::new(addr);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to node agent at {}", addr))?;
    Ok(client)
}

fn report(accepted: bool, what: &str, addr: &str) -> Result<()> {
    if accepted {
        print_success(&format!("{} accepted by {}", what, addr.cyan()));
        Ok(())
    } else {
        print_error(&format!("{} rejected by {}", what, addr));
        anyhow::bail!("node agent answered Failure")
    }
}

/// `updatePods pod:uid ...`
pub async fn update_pods(addr: &str, pods: &[String]) -> Result<()> {
    let pods = parse_pod_uids(pods)?;
    let mut client = connect(addr).await?;
    let accepted = client.update_pods(&pods).await?;
    report(accepted, &format!("{} pod registrations", pods.len()), addr)
}

/// `updatePods` then `applyCPUShares` on one connection
///
/// Registrations only live as long as the connection, so shares are always
/// sent right after the pods they refer to.
pub async fn apply_shares(addr: &str, pods: &[String], shares: &[String]) -> Result<()> {
    let pods = parse_pod_uids(pods)?;
    let shares: Vec<(String, f64)> = parse_pod_shares(shares)?
        .into_iter()
        .map(|(pod, share)| (pod, share as f64))
        .collect();

    let mut client = connect(addr).await?;
    if !client.update_pods(&pods).await? {
        print_error("Pod registration rejected");
        anyhow::bail!("node agent answered Failure");
    }
    let accepted = client.apply_cpu_shares(&shares).await?;
    report(accepted, &format!("{} CPU shares", shares.len()), addr)
}

/// `updatePods` then `getCPUUtilizations` on one connection
pub async fn utilizations(addr: &str, pods: &[String], format: OutputFormat) -> Result<()> {
    let pods = parse_pod_uids(pods)?;
    let mut client = connect(addr).await?;
    if !pods.is_empty() && !client.update_pods(&pods).await? {
        print_error("Pod registration rejected");
        anyhow::bail!("node agent answered Failure");
    }

    let utils = client.get_cpu_utilizations().await?;
    let rows: Vec<UtilizationRow> = utils
        .iter()
        .map(|u| UtilizationRow {
            pod: u.pod_name.clone(),
            percent: color_utilization(u.percent, u.is_sentinel()),
        })
        .collect();
    print_table(&utils, rows, format);
    Ok(())
}
