//! Configuration module for tfpilot.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `tfpilot.yaml`
//! - Environment overrides and `.env` loading
//! - Validation of configuration values against the workdir
//! - Variable file discovery

mod model;
mod parser;
mod validator;

pub use parser::{
    discover_var_files, find_config_file, global_config_path, ConfigParser,
    DEFAULT_CONFIG_FILES, ENV_BINARY, ENV_GRACE_PERIOD, ENV_PLAN_FILE,
};
pub use model::{PilotConfig, ToolConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
