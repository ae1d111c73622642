//! Node Fleet Autoscaler CLI
//!
//! A command-line tool for inspecting pools, nodes, and cycle reports
//! of the node fleet autoscaler daemon, and for injecting interruption
//! notices to exercise spot reclaim handling.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{interrupt, nodes, pools, report};

/// Node Fleet Autoscaler CLI
#[derive(Parser)]
#[command(name = "nfa")]
#[command(author, version, about = "CLI for the Node Fleet Autoscaler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via NFA_API_URL env var)
    #[arg(long, env = "NFA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage node pools
    #[command(subcommand)]
    Pools(PoolsCommands),

    /// List nodes managed by the autoscaler
    Nodes {
        /// Filter by pool name
        #[arg(long, short)]
        pool: Option<String>,
    },

    /// Show the most recent decision cycle report
    Report,

    /// Inject a spot interruption notice for a node
    Interrupt {
        /// Node ID to interrupt
        node: String,

        /// Seconds until the capacity is reclaimed
        #[arg(long, default_value_t = 120)]
        deadline_in: i64,
    },
}

#[derive(Subcommand)]
pub enum PoolsCommands {
    /// List registered pools
    List,

    /// Register a pool from a JSON definition file
    Add {
        /// Path to the pool definition file
        #[arg(long, short)]
        file: String,
    },

    /// Remove a pool by name
    Remove {
        /// Pool name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Flag and env var take precedence over the config file
    let file_config = config::Config::load().unwrap_or_default();
    let api_url = cli
        .api_url
        .or(file_config.api_url)
        .unwrap_or_else(|| "http://localhost:8087".to_string());

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Pools(pools_cmd) => match pools_cmd {
            PoolsCommands::List => {
                pools::list_pools(&client, cli.format).await?;
            }
            PoolsCommands::Add { file } => {
                pools::add_pool(&client, &file).await?;
            }
            PoolsCommands::Remove { name } => {
                pools::remove_pool(&client, &name).await?;
            }
        },
        Commands::Nodes { pool } => {
            nodes::list_nodes(&client, pool.as_deref(), cli.format).await?;
        }
        Commands::Report => {
            report::show_report(&client, cli.format).await?;
        }
        Commands::Interrupt { node, deadline_in } => {
            interrupt::inject_interruption(&client, &node, deadline_in).await?;
        }
    }

    Ok(())
}
