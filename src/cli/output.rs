//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::{ColoredString, Colorize};
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::changeset::{Action, AttributeDiff, ChangeSet, ChangeSummary, ResourceChange};
use crate::runner::{OutputLine, StreamKind};
use crate::state::ResourceIndex;

use super::commands::OutputFormat;

/// Longest attribute value shown inline before truncation.
const VALUE_WIDTH: usize = 60;

/// Output formatter for CLI.
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// State resource row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Address")]
    address: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a change set for display.
    #[must_use]
    pub fn format_change_set(&self, change_set: &ChangeSet) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(change_set).unwrap_or_default(),
            OutputFormat::Text => Self::format_change_set_text(change_set),
        }
    }

    /// Formats a change set as a module tree.
    fn format_change_set_text(change_set: &ChangeSet) -> String {
        if !change_set.summary.has_changes() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(
            output,
            "\n📋 Change set {}",
            change_set.signature.short().dimmed()
        );

        for module in &change_set.modules {
            let changed: Vec<&ResourceChange> = module
                .resources
                .iter()
                .filter(|r| r.action.is_change())
                .collect();
            if changed.is_empty() {
                continue;
            }

            let _ = writeln!(output, "\n📦 {}", module.display_name().bold());
            for resource in changed {
                Self::write_resource(&mut output, resource);
            }
        }

        let _ = writeln!(output, "\n{}", Self::format_summary(&change_set.summary));
        output
    }

    fn write_resource(output: &mut String, resource: &ResourceChange) {
        let marker = Self::colorize(resource.action, resource.action.symbol());
        let _ = writeln!(
            output,
            "  {marker} {} {}",
            resource.address,
            format!("({})", resource.action).dimmed()
        );

        if !matches!(resource.action, Action::Update | Action::Replace) {
            return;
        }
        for (path, diff) in &resource.attribute_diffs {
            let forces = resource.replace_paths.iter().any(|p| p == path);
            let _ = writeln!(
                output,
                "      {path}: {}{}",
                Self::format_diff(diff),
                if forces {
                    format!(" {}", "# forces replacement".red())
                } else {
                    String::new()
                }
            );
        }
    }

    fn format_diff(diff: &AttributeDiff) -> String {
        let after = if diff.after_unknown {
            "(known after apply)".dimmed().to_string()
        } else {
            Self::format_value(diff.after.as_ref())
        };
        format!("{} → {after}", Self::format_value(diff.before.as_ref()))
    }

    fn format_value(value: Option<&Value>) -> String {
        value.map_or_else(
            || "(none)".dimmed().to_string(),
            |v| Self::truncate(&v.to_string(), VALUE_WIDTH),
        )
    }

    /// Formats operator-facing totals with per-action colors.
    #[must_use]
    pub fn format_summary(summary: &ChangeSummary) -> String {
        if !summary.has_changes() {
            return String::from("No changes.");
        }
        format!(
            "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red()
        )
    }

    /// Formats a state index for display.
    #[must_use]
    pub fn format_index(&self, index: &ResourceIndex) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(index).unwrap_or_default(),
            OutputFormat::Text => Self::format_index_text(index),
        }
    }

    fn format_index_text(index: &ResourceIndex) -> String {
        if index.is_empty() {
            return String::from("   No resources found.\n");
        }

        let mut output = String::new();
        for (resource_type, resources) in index.groups() {
            let _ = writeln!(
                output,
                "\n💾 {} ({})",
                resource_type.bold(),
                resources.len()
            );
            let rows: Vec<StateRow> = resources
                .iter()
                .map(|r| StateRow {
                    mode: r.mode.marker().to_string(),
                    name: r.name.clone(),
                    module: if r.module_address.is_empty() {
                        String::from("root")
                    } else {
                        r.module_address.clone()
                    },
                    address: r.address.clone(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(output, "\n{}\n", Self::format_index_summary(index));
        output
    }

    /// Formats resource and type totals of a state index.
    #[must_use]
    pub fn format_index_summary(index: &ResourceIndex) -> String {
        format!(
            "{} resources across {} types",
            index.len(),
            index.groups().len()
        )
    }

    /// Formats one line of tool output.
    #[must_use]
    pub fn format_output_line(&self, line: &OutputLine) -> String {
        match (self.format, line.stream) {
            (OutputFormat::Json, _) => serde_json::to_string(line).unwrap_or_default(),
            (OutputFormat::Text, StreamKind::Stdout) => line.text.clone(),
            (OutputFormat::Text, StreamKind::Stderr) => line.text.red().to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", "✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", "✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", "⚠".yellow(), message)
    }

    fn message(&self, status: &str, icon: ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{icon} {message}"),
        }
    }

    fn colorize(action: Action, text: &str) -> ColoredString {
        match action {
            Action::Create => text.green(),
            Action::Update => text.yellow(),
            Action::Delete => text.red(),
            Action::Replace => text.magenta(),
            Action::NoOp => text.dimmed(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
