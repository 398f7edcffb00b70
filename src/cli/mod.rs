//! CLI module for terragraph.
//!
//! This module provides the command-line interface for validating,
//! planning and applying configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
