//! Invocations of the provisioning tool.
//!
//! Builds the exact command lines the controller runs. Every invocation runs
//! non-interactively, without color, with `TF_IN_AUTOMATION=1` set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ToolConfig;
use crate::runner::Invocation;

/// Builder for provisioning tool invocations.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    binary: String,
    plan_file: String,
    env: BTreeMap<String, String>,
}

impl ToolCommands {
    /// Creates a builder for the given binary and plan artifact name.
    #[must_use]
    pub fn new(binary: impl Into<String>, plan_file: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            plan_file: plan_file.into(),
            env: BTreeMap::new(),
        }
    }

    /// Creates a builder from tool configuration.
    #[must_use]
    pub fn from_config(tool: &ToolConfig) -> Self {
        Self::new(&tool.binary, &tool.plan_file).with_env(tool.env.clone())
    }

    /// Sets extra environment variables.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Tool executable.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Location of the plan artifact inside `workdir`.
    #[must_use]
    pub fn artifact_path(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.plan_file)
    }

    /// `init -input=false -no-color`
    #[must_use]
    pub fn init(&self, workdir: &Path) -> Invocation {
        self.base(workdir).args(["init", "-input=false", "-no-color"])
    }

    /// `plan -input=false -no-color -out=<artifact> [-var-file=<f>]...`
    #[must_use]
    pub fn plan(&self, workdir: &Path, var_files: &[PathBuf]) -> Invocation {
        self.base(workdir)
            .args(["plan", "-input=false", "-no-color"])
            .arg(format!("-out={}", self.plan_file))
            .args(
                var_files
                    .iter()
                    .map(|f| format!("-var-file={}", f.display())),
            )
    }

    /// `show -json -no-color <artifact>`
    #[must_use]
    pub fn show_plan(&self, workdir: &Path) -> Invocation {
        self.base(workdir)
            .args(["show", "-json", "-no-color"])
            .arg(&self.plan_file)
    }

    /// `apply -input=false -no-color <artifact>`
    #[must_use]
    pub fn apply(&self, workdir: &Path) -> Invocation {
        self.base(workdir)
            .args(["apply", "-input=false", "-no-color"])
            .arg(&self.plan_file)
    }

    /// `show -json -no-color`
    #[must_use]
    pub fn show_state(&self, workdir: &Path) -> Invocation {
        self.base(workdir).args(["show", "-json", "-no-color"])
    }

    fn base(&self, workdir: &Path) -> Invocation {
        Invocation::new(&self.binary, workdir)
            .envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .envs([("TF_IN_AUTOMATION", "1")])
    }
}
