//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tfpilot - Review and apply Terraform change sets.
#[derive(Parser, Debug)]
#[command(name = "tfpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Working directory holding the Terraform configuration.
    #[arg(short, long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "TFPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the working directory.
    Init,

    /// Create a plan and show the change tree.
    Plan {
        /// Variable file to pass to the plan (repeatable).
        #[arg(long = "var-file", value_name = "FILE")]
        var_files: Vec<PathBuf>,
    },

    /// Create a plan, review it and apply it.
    Apply {
        /// Variable file to pass to the plan (repeatable).
        #[arg(long = "var-file", value_name = "FILE")]
        var_files: Vec<PathBuf>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the resources recorded in state.
    State {
        /// Only show resources whose address, type or name contains this text.
        #[arg(short, long)]
        search: Option<String>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_with_var_files() {
        let cli = Cli::parse_from([
            "tfpilot",
            "--dir",
            "infra",
            "apply",
            "--var-file",
            "prod.tfvars",
            "--var-file",
            "extra.tfvars",
            "--yes",
        ]);
        assert_eq!(cli.dir, PathBuf::from("infra"));
        match cli.command {
            Commands::Apply { var_files, yes } => {
                assert_eq!(var_files.len(), 2);
                assert!(yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_state_json() {
        let cli = Cli::parse_from(["tfpilot", "state", "--search", "vpc", "--output", "json"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::State { search: Some(ref q) } if q == "vpc"));
    }
}
