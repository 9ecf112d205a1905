//! CLI module for the edgestack reconciler.
//!
//! This module provides the command-line interface for planning, applying
//! and destroying static-site stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
