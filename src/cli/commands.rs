//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::graph::DEFAULT_PARALLELISM;

/// terragraph - plan and apply declarative infrastructure as a dependency graph.
#[derive(Parser, Debug)]
#[command(name = "terragraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "TERRAGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Maximum number of nodes visited concurrently.
    #[arg(
        long,
        global = true,
        env = "TERRAGRAPH_PARALLELISM",
        default_value_t = DEFAULT_PARALLELISM
    )]
    pub parallelism: usize,

    /// Stop starting new nodes after the first failure.
    #[arg(long, global = true)]
    pub fail_fast: bool,

    /// Path to the state file.
    #[arg(long, global = true, env = "TERRAGRAPH_STATE")]
    pub state: Option<PathBuf>,

    /// Root variable value as name=value (repeatable).
    #[arg(long = "var", global = true, value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print the dependency graph.
    Graph {
        /// Emit Graphviz DOT instead of a table.
        #[arg(long)]
        dot: bool,
    },

    /// Compute and display the change plan.
    Plan {
        /// Show attribute-level changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply every planned change.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State inspection subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List every recorded resource.
    List,

    /// Show one recorded resource.
    Show {
        /// Stable name of the resource.
        name: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
