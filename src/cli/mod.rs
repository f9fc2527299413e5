//! CLI module for the Converge provisioner.
//!
//! This module provides the command-line interface for planning and
//! applying manifests.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
