//! Error types for tfpilot.
//!
//! This module provides the error hierarchy shared by the process runner,
//! the plan and state parsers, the session controller and configuration
//! loading.

use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of characters of offending input kept in a [`ParseError`].
pub const FRAGMENT_LIMIT: usize = 200;

/// Maximum number of stderr lines kept in a [`TfPilotError::ProcessExit`].
pub const STDERR_TAIL_LINES: usize = 40;

/// The main error type for tfpilot.
#[derive(Debug, Error)]
pub enum TfPilotError {
    /// The external executable could not be started.
    #[error("Failed to start '{program}': {reason}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Why the spawn failed.
        reason: String,
    },

    /// Structured tool output could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Apply was requested without a fresh, unconsumed plan.
    #[error("Stale plan: {reason}")]
    StalePlan {
        /// Precondition that was not met.
        reason: String,
    },

    /// Another operation is already running.
    #[error("Session is busy: {operation} already in progress")]
    Busy {
        /// Operation currently holding the session.
        operation: String,
    },

    /// The external tool exited with a non-zero status.
    #[error("'{command}' exited with {}{}", format_code(.code), format_stderr(.stderr))]
    ProcessExit {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured stderr (tail).
        stderr: String,
    },

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or inconsistent structured output from the provisioning tool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (at: {fragment})")]
pub struct ParseError {
    /// Description of the problem.
    pub message: String,
    /// The offending piece of input, truncated.
    pub fragment: String,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The working directory does not exist or is not a directory.
    #[error("Working directory not usable: {path}")]
    InvalidWorkdir {
        /// Offending path.
        path: PathBuf,
    },
}

/// Result type alias for tfpilot operations.
pub type Result<T> = std::result::Result<T, TfPilotError>;

fn format_code(code: &Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit code (terminated by signal)"), |c| format!("code {c}"))
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(":\n{stderr}")
    }
}

impl TfPilotError {
    /// Creates a stale-plan rejection.
    #[must_use]
    pub fn stale_plan(reason: impl Into<String>) -> Self {
        Self::StalePlan {
            reason: reason.into(),
        }
    }

    /// Creates a process-exit error, keeping only the tail of stderr.
    #[must_use]
    pub fn process_exit(command: impl Into<String>, code: Option<i32>, stderr: &[String]) -> Self {
        let start = stderr.len().saturating_sub(STDERR_TAIL_LINES);
        Self::ProcessExit {
            command: command.into(),
            code,
            stderr: stderr[start..].join("\n"),
        }
    }

    /// Returns true if this error is a local guard rejection rather than a failure.
    ///
    /// Guard rejections leave the session untouched.
    #[must_use]
    pub const fn is_operator_error(&self) -> bool {
        matches!(self, Self::StalePlan { .. } | Self::Busy { .. })
    }
}

impl ParseError {
    /// Creates a parse error, truncating the fragment.
    #[must_use]
    pub fn new(message: impl Into<String>, fragment: impl AsRef<str>) -> Self {
        Self {
            message: message.into(),
            fragment: truncate_fragment(fragment.as_ref()),
        }
    }

    /// Creates a parse error whose fragment is the JSON rendering of `value`.
    #[must_use]
    pub fn at_value(message: impl Into<String>, value: &serde_json::Value) -> Self {
        Self::new(message, value.to_string())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

fn truncate_fragment(fragment: &str) -> String {
    let trimmed = fragment.trim();
    if trimmed.chars().count() <= FRAGMENT_LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(FRAGMENT_LIMIT).collect();
    out.push('…');
    out
}
