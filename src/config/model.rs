//! Configuration specification types.
//!
//! This module defines the structs that map to the `tfpilot.yaml` file. Every
//! field has a default, so an absent or empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PilotConfig {
    /// Provisioning tool settings.
    #[serde(default)]
    pub tool: ToolConfig,
    /// Variable files selected when a plan is requested without any.
    #[serde(default)]
    pub var_files: Vec<PathBuf>,
}

/// How the provisioning tool is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    /// Executable name or path (`terraform`, `tofu`).
    #[serde(default = "default_binary")]
    pub binary: String,
    /// File name of the saved plan artifact inside the workdir.
    #[serde(default = "default_plan_file")]
    pub plan_file: String,
    /// Seconds to wait after SIGTERM before force-killing.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Capacity of the per-invocation event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Extra environment variables layered over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            plan_file: default_plan_file(),
            grace_period_secs: default_grace_period_secs(),
            channel_capacity: default_channel_capacity(),
            env: BTreeMap::new(),
        }
    }
}

impl ToolConfig {
    /// Grace period as a duration.
    #[must_use]
    pub const fn grace_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.grace_period_secs)
    }
}

fn default_binary() -> String {
    String::from("terraform")
}

fn default_plan_file() -> String {
    String::from("tfplan.out")
}

const fn default_grace_period_secs() -> u64 {
    5
}

const fn default_channel_capacity() -> usize {
    256
}
