//! Validate the `HOSTS`, `PODS` and `LBS` topology

use anyhow::Result;
use balancer_lib::Topology;
use colored::Colorize;
use tabled::Tabled;

use crate::output::{print_info, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Host")]
    name: String,
    #[tabled(rename = "Capacity")]
    capacity: i64,
    #[tabled(rename = "Pods")]
    pods: String,
    #[tabled(rename = "Agent")]
    agent: String,
}

#[derive(Tabled)]
struct LbRow {
    #[tabled(rename = "App")]
    index: usize,
    #[tabled(rename = "Load balancer")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Pods")]
    pods: String,
}

pub fn check(hosts: &str, pods: &str, lbs: &str, format: OutputFormat) -> Result<()> {
    let topology = Topology::parse(hosts, pods, lbs)?;

    let host_rows: Vec<HostRow> = topology
        .hosts()
        .iter()
        .map(|h| HostRow {
            name: h.name.clone(),
            capacity: h.load_capacity,
            pods: h.pod_names.join(", "),
            agent: h.agent_address.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let lb_rows: Vec<LbRow> = topology
        .load_balancers()
        .iter()
        .enumerate()
        .map(|(i, lb)| LbRow {
            index: i,
            name: lb.name.clone(),
            address: lb.ip_address.clone(),
            pods: lb.pod_names.join(", "),
        })
        .collect();

    if matches!(format, OutputFormat::Table) {
        println!("{}", "Hosts".bold());
    }
    print_table(topology.hosts(), host_rows, format);
    if matches!(format, OutputFormat::Table) {
        println!("{}", "Load balancers".bold());
    }
    print_table(topology.load_balancers(), lb_rows, format);

    let problems = topology.problems();
    if problems.is_empty() {
        print_success(&format!(
            "{} hosts, {} pods, {} load balancers",
            topology.hosts().len(),
            topology.pods().len(),
            topology.load_balancers().len()
        ));
        let without_uid = topology.pods().iter().filter(|p| p.uid.is_none()).count();
        if without_uid > 0 {
            print_info(&format!(
                "{} pods have no uid and cannot receive CPU shares",
                without_uid
            ));
        }
        return Ok(());
    }

    for problem in &problems {
        print_warning(problem);
    }
    anyhow::bail!("topology has {} problem(s)", problems.len())
}
