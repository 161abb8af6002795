//! CLI module for tfpilot.
//!
//! This module provides the command-line interface for reviewing and
//! applying Terraform change sets.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
