//! Configuration validation.
//!
//! Checks a loaded configuration against the session workdir before any
//! command runs, collecting every problem rather than stopping at the first.

use crate::error::{ConfigError, Result, TfPilotError};
use std::path::{Component, Path};
use tracing::debug;

use super::model::{PilotConfig, ToolConfig};

/// Allowed range for the termination grace period, in seconds.
const GRACE_PERIOD_RANGE: std::ops::RangeInclusive<u64> = 1..=120;

/// Validator for pilot configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration. Relative var files resolve against `workdir`.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &PilotConfig, workdir: &Path) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_tool(&config.tool, &mut result);
        Self::validate_var_files(&config.var_files, workdir, "var_files", &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(TfPilotError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Checks var files passed on the command line.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing file.
    pub fn validate_selection(&self, var_files: &[impl AsRef<Path>], workdir: &Path) -> Result<()> {
        let mut result = ValidationResult::default();
        Self::validate_var_files(var_files, workdir, "--var-file", &mut result);
        match result.errors.first() {
            None => Ok(()),
            Some(error) => Err(TfPilotError::Config(ConfigError::validation(
                error.message.clone(),
                error.field.clone(),
            ))),
        }
    }

    fn validate_tool(tool: &ToolConfig, result: &mut ValidationResult) {
        if tool.binary.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("tool.binary"),
                message: String::from("Tool binary cannot be empty"),
            });
        }

        if !is_bare_file_name(&tool.plan_file) {
            result.errors.push(ValidationError {
                field: String::from("tool.plan_file"),
                message: format!(
                    "Plan file '{}' must be a file name without directories",
                    tool.plan_file
                ),
            });
        }

        if !GRACE_PERIOD_RANGE.contains(&tool.grace_period_secs) {
            result.errors.push(ValidationError {
                field: String::from("tool.grace_period_secs"),
                message: format!(
                    "Grace period must be between {} and {} seconds, got {}",
                    GRACE_PERIOD_RANGE.start(),
                    GRACE_PERIOD_RANGE.end(),
                    tool.grace_period_secs
                ),
            });
        }

        if tool.channel_capacity == 0 {
            result.errors.push(ValidationError {
                field: String::from("tool.channel_capacity"),
                message: String::from("Channel capacity must be at least 1"),
            });
        }

        for key in tool.env.keys() {
            if key.is_empty() || key.contains('=') {
                result.errors.push(ValidationError {
                    field: format!("tool.env.{key}"),
                    message: format!("'{key}' is not a valid environment variable name"),
                });
            }
        }
        if tool.env.contains_key("TF_IN_AUTOMATION") {
            result
                .warnings
                .push(String::from("tool.env.TF_IN_AUTOMATION is always set and will be overridden"));
        }
    }

    fn validate_var_files(
        var_files: &[impl AsRef<Path>],
        workdir: &Path,
        field: &str,
        result: &mut ValidationResult,
    ) {
        for (i, file) in var_files.iter().enumerate() {
            let file = file.as_ref();
            let resolved = workdir.join(file);
            if !resolved.is_file() {
                result.errors.push(ValidationError {
                    field: format!("{field}[{i}]"),
                    message: format!("Variable file '{}' does not exist", resolved.display()),
                });
                continue;
            }

            let name = file.to_string_lossy();
            if !(name.ends_with(".tfvars") || name.ends_with(".tfvars.json")) {
                result.warnings.push(format!(
                    "Variable file '{name}' does not have a .tfvars or .tfvars.json extension"
                ));
            }
        }
    }
}

/// Returns true if the name is a single normal path component.
fn is_bare_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
        && !name.contains('\\')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
