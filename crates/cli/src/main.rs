//! Fleet balancer CLI
//!
//! A command-line tool for poking the node agents, the controller ingress
//! and the load balancers by hand, and for validating a topology before it
//! is handed to the controller.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{agent, lb, report, topology};

/// Fleet balancer CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "Operator CLI for the fleet balancer", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Talk to a node agent
    #[command(subcommand)]
    Agent(AgentCommands),

    /// Send one load report to the controller
    Report {
        /// Controller base URL
        #[arg(long, env = "CONTROLLER_URL", default_value = "http://localhost:3000")]
        controller: String,

        /// Reporting pod name
        #[arg(long)]
        pod: String,

        /// Requests counted in the interval
        #[arg(long)]
        count: i64,

        /// Round marker; defaults to the current unix time in nanoseconds
        #[arg(long)]
        k: Option<i64>,
    },

    /// Talk to a load balancer
    #[command(subcommand)]
    Lb(LbCommands),

    /// Inspect the fleet topology
    #[command(subcommand)]
    Topology(TopologyCommands),
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Register pods (pod:uid ...)
    UpdatePods {
        /// Node agent address
        #[arg(long, default_value = "127.0.0.1:9988")]
        addr: String,

        /// Pods as pod:uid
        #[arg(required = true)]
        pods: Vec<String>,
    },

    /// Register pods, then apply CPU shares (pod:share ...)
    ApplyShares {
        /// Node agent address
        #[arg(long, default_value = "127.0.0.1:9988")]
        addr: String,

        /// Pods as pod:uid; registrations do not outlive the connection
        #[arg(long = "pod", required = true)]
        pods: Vec<String>,

        /// Shares as pod:share
        #[arg(required = true)]
        shares: Vec<String>,
    },

    /// Sample CPU utilization of registered pods
    Utils {
        /// Node agent address
        #[arg(long, default_value = "127.0.0.1:9988")]
        addr: String,

        /// Pods to register first, as pod:uid
        #[arg(long = "pod")]
        pods: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum LbCommands {
    /// Replace the endpoint set of a load balancer
    SetEndpoints {
        /// Load balancer address
        #[arg(long)]
        lb: String,

        /// New endpoints, with or without port
        #[arg(required = true)]
        endpoints: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum TopologyCommands {
    /// Parse HOSTS, PODS and LBS and report dangling references
    Check {
        #[arg(long, env = "HOSTS")]
        hosts: String,

        #[arg(long, env = "PODS")]
        pods: String,

        #[arg(long, env = "LBS")]
        lbs: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent(agent_cmd) => match agent_cmd {
            AgentCommands::UpdatePods { addr, pods } => {
                agent::update_pods(&addr, &pods).await?;
            }
            AgentCommands::ApplyShares { addr, pods, shares } => {
                agent::apply_shares(&addr, &pods, &shares).await?;
            }
            AgentCommands::Utils { addr, pods } => {
                agent::utilizations(&addr, &pods, cli.format).await?;
            }
        },
        Commands::Report {
            controller,
            pod,
            count,
            k,
        } => {
            report::send_report(&controller, &pod, count, k).await?;
        }
        Commands::Lb(LbCommands::SetEndpoints { lb, endpoints }) => {
            lb::set_endpoints(&lb, &endpoints).await?;
        }
        Commands::Topology(TopologyCommands::Check { hosts, pods, lbs }) => {
            topology::check(&hosts, &pods, &lbs, cli.format)?;
        }
    }

    Ok(())
}
