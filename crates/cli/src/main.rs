//! Cluster Health Model CLI
//!
//! Offline tooling for the health model: validate and render monitor
//! topologies, inspect persisted state snapshots and replay recorded
//! batches through the evaluation pipeline.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{replay, state, topology};
use health_lib::MonitorState;
use output::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Cluster Health Model CLI
#[derive(Parser)]
#[command(name = "hmctl")]
#[command(author, version, about = "CLI for the Cluster Health Model", long_about = None)]
pub struct Cli {
    /// Output format (defaults to the configured format, then table)
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    /// Log pipeline activity to stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a persisted state snapshot
    #[command(subcommand)]
    State(StateCommands),

    /// Validate and render monitor topologies
    #[command(subcommand)]
    Topology(TopologyCommands),

    /// Run recorded batches through the pipeline offline
    Replay {
        /// Monitor topology file
        #[arg(long, short)]
        definition: Option<PathBuf>,

        /// Batches as JSON lines: {"tag": ..., "records": [...]}
        #[arg(long, short)]
        batches: PathBuf,

        /// Per-monitor configuration file
        #[arg(long)]
        monitor_config: Option<PathBuf>,

        /// Inventory document ({"nodes": [...], "workloads": [...]})
        #[arg(long)]
        inventory: Option<PathBuf>,

        #[arg(long, env = "CLUSTER_ID")]
        cluster_id: Option<String>,

        /// Restore from and save state to this snapshot
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// Manage CLI defaults
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// List monitor instances in a snapshot
    List {
        /// Snapshot file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only instances currently in this state
        #[arg(long)]
        state: Option<MonitorState>,

        /// Only instance ids starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Show one monitor instance
    Show {
        /// Monitor instance id
        instance_id: String,

        /// Snapshot file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TopologyCommands {
    /// Validate a topology file
    Check {
        /// Topology file (defaults to the configured definition)
        path: Option<PathBuf>,
    },

    /// Print the monitor tree
    Tree {
        /// Topology file (defaults to the configured definition)
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration
    Show,

    /// Set a configuration key; an empty value clears it
    Set {
        /// One of: definition_path, state_path, monitor_config_path, cluster_id, default_format
        key: String,
        value: String,
    },
}

fn main() {
    if let Err(e) = run() {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "error" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut cfg = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| cfg.default_format.as_deref().and_then(OutputFormat::parse_name))
        .unwrap_or_default();

    match cli.command {
        Commands::State(state_cmd) => match state_cmd {
            StateCommands::List {
                file,
                state: filter,
                prefix,
            } => {
                let path = config::resolve_path(file, cfg.state_path.as_ref(), "state file")?;
                state::list_states(&path, filter, prefix.as_deref(), format)?;
            }
            StateCommands::Show { instance_id, file } => {
                let path = config::resolve_path(file, cfg.state_path.as_ref(), "state file")?;
                state::show_state(&path, &instance_id, format)?;
            }
        },
        Commands::Topology(topology_cmd) => match topology_cmd {
            TopologyCommands::Check { path } => {
                let path = config::resolve_path(path, cfg.definition_path.as_ref(), "topology file")?;
                topology::check(&path, format)?;
            }
            TopologyCommands::Tree { path } => {
                let path = config::resolve_path(path, cfg.definition_path.as_ref(), "topology file")?;
                topology::tree(&path, format)?;
            }
        },
        Commands::Replay {
            definition,
            batches,
            monitor_config,
            inventory,
            cluster_id,
            state_file,
        } => {
            let options = replay::ReplayOptions {
                definition: config::resolve_path(
                    definition,
                    cfg.definition_path.as_ref(),
                    "topology file",
                )?,
                batches,
                monitor_config: monitor_config.or_else(|| cfg.monitor_config_path.clone()),
                inventory,
                cluster_id: cluster_id
                    .or_else(|| cfg.cluster_id.clone())
                    .unwrap_or_else(|| "local".to_string()),
                state_file,
            };
            replay::replay(options, format)?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                output::print_info(&format!("{}", config::Config::config_path()?.display()));
                output::print_json(&cfg);
            }
            ConfigCommands::Set { key, value } => {
                cfg.set(&key, &value)?;
                let path = cfg.save()?;
                output::print_success(&format!("Saved {} to {}", key, path.display()));
            }
        },
    }

    Ok(())
}
