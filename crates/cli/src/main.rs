//! Group controller CLI
//!
//! A command-line tool for checking a running group controller and for
//! previewing placement, anomaly and consolidation decisions offline
//! against a cluster snapshot.

mod client;
mod commands;
mod config;
mod output;
mod snapshot;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{plan, status};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Group controller CLI
#[derive(Parser)]
#[command(name = "clusterctl")]
#[command(author, version, about = "CLI for the Group Controller", long_about = None)]
pub struct Cli {
    /// Controller API URL (can also be set via CLUSTERCTL_API_URL env var)
    #[arg(long, env = "CLUSTERCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show controller status and component health
    Status,

    /// Preview policy decisions against a cluster snapshot
    #[command(subcommand)]
    Plan(PlanCommands),
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Place new virtual machines
    Place {
        /// Cluster snapshot (JSON); defaults to the configured one
        #[arg(long, short)]
        snapshot: Option<PathBuf>,

        /// Virtual machines to place (JSON array)
        #[arg(long)]
        vms: PathBuf,

        /// Placement policy overriding the snapshot settings
        #[arg(long)]
        policy: Option<String>,
    },

    /// Classify every host against its thresholds
    Detect {
        /// Cluster snapshot (JSON); defaults to the configured one
        #[arg(long, short)]
        snapshot: Option<PathBuf>,
    },

    /// Relocate virtual machines away from an anomalous host
    Relocate {
        /// Cluster snapshot (JSON); defaults to the configured one
        #[arg(long, short)]
        snapshot: Option<PathBuf>,

        /// Host to relieve
        #[arg(long)]
        host: String,
    },

    /// Consolidate the cluster onto fewer hosts
    Consolidate {
        /// Cluster snapshot (JSON); defaults to the configured one
        #[arg(long, short)]
        snapshot: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let format = cli
        .format
        .or_else(|| config.default_format())
        .unwrap_or_default();

    match cli.command {
        Commands::Status => {
            let api_url = cli
                .api_url
                .or(config.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
            if cli.verbose {
                output::print_info(&format!("Querying {}", api_url));
            }
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, format).await?;
        }
        Commands::Plan(plan_cmd) => match plan_cmd {
            PlanCommands::Place {
                snapshot,
                vms,
                policy,
            } => {
                let snapshot = config.resolve_snapshot(snapshot)?;
                plan::place(&snapshot, &vms, policy.as_deref(), format)?;
            }
            PlanCommands::Detect { snapshot } => {
                let snapshot = config.resolve_snapshot(snapshot)?;
                plan::detect(&snapshot, format)?;
            }
            PlanCommands::Relocate { snapshot, host } => {
                let snapshot = config.resolve_snapshot(snapshot)?;
                plan::relocate(&snapshot, &host, format)?;
            }
            PlanCommands::Consolidate { snapshot } => {
                let snapshot = config.resolve_snapshot(snapshot)?;
                plan::consolidate(&snapshot, format)?;
            }
        },
    }

    Ok(())
}
