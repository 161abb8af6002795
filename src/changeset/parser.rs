//! Plan document parsing.
//!
//! Turns the output of `terraform show -json <planfile>` into a [`ChangeSet`].
//! Only `resource_changes` is read; every other top-level field except the
//! version strings is ignored.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::address::ResourceAddress;
use super::diff::{diff_attributes, render_path};
use super::signature::PlanSignature;
use super::types::{Action, ChangeSet, ChangeSummary, ModuleNode, ResourceChange};
use crate::error::ParseError;

/// One entry of `resource_changes`.
#[derive(Debug, Deserialize)]
struct RawResourceChange {
    address: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    change: RawChange,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    actions: Vec<String>,
    #[serde(default)]
    before: Option<Value>,
    #[serde(default)]
    after: Option<Value>,
    #[serde(default)]
    after_unknown: Option<Value>,
    #[serde(default)]
    replace_paths: Option<Vec<Vec<Value>>>,
}

/// Parser for structured plan output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeSetParser;

impl ChangeSetParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses a plan document from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON or the document is malformed.
    pub fn parse(&self, input: &str) -> Result<ChangeSet, ParseError> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| ParseError::new(format!("invalid plan JSON: {e}"), input))?;
        self.parse_value(&value)
    }

    /// Parses an already decoded plan document.
    ///
    /// # Errors
    ///
    /// Returns an error on missing or mistyped fields, an unclassifiable
    /// entry, or a duplicate resource address.
    pub fn parse_value(&self, document: &Value) -> Result<ChangeSet, ParseError> {
        let Some(object) = document.as_object() else {
            return Err(ParseError::at_value(
                "plan document is not a JSON object",
                document,
            ));
        };

        let entries = match object.get("resource_changes") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => {
                return Err(ParseError::at_value(
                    "'resource_changes' is not an array",
                    other,
                ));
            }
        };

        let mut modules: BTreeMap<String, Vec<ResourceChange>> = BTreeMap::new();
        modules.insert(String::new(), Vec::new());
        let mut seen = HashSet::new();
        let mut summary = ChangeSummary::default();
        let mut skipped = 0usize;

        for entry in entries {
            let raw: RawResourceChange = serde_json::from_value(entry.clone()).map_err(|e| {
                ParseError::at_value(format!("invalid resource change: {e}"), entry)
            })?;

            if raw.mode.as_deref() == Some("data") {
                skipped += 1;
                continue;
            }

            if !seen.insert(raw.address.clone()) {
                return Err(ParseError::at_value(
                    format!("duplicate resource address '{}'", raw.address),
                    entry,
                ));
            }

            let change = build_change(raw, entry)?;
            summary.record(change.action);
            modules
                .entry(change.module_address.clone())
                .or_default()
                .push(change);
        }

        let modules: Vec<ModuleNode> = modules
            .into_iter()
            .map(|(address, resources)| ModuleNode { address, resources })
            .collect();

        let signature = PlanSignature::compute(modules.iter().flat_map(|m| m.resources.iter()));

        debug!(
            "Parsed plan: {} resources in {} modules ({} data reads skipped), signature {}",
            seen.len(),
            modules.len(),
            skipped,
            signature
        );

        Ok(ChangeSet {
            modules,
            summary,
            signature,
            format_version: string_field(object, "format_version"),
            terraform_version: string_field(object, "terraform_version"),
            created_at: Utc::now(),
        })
    }
}

fn build_change(
    raw: RawResourceChange,
    entry: &Value,
) -> Result<ResourceChange, ParseError> {
    let address = ResourceAddress::parse(&raw.address)?;
    let change = raw.change;

    let before = change.before.filter(|v| !v.is_null());
    let after = change.after.filter(|v| !v.is_null());
    let replace_paths: Vec<String> = change
        .replace_paths
        .unwrap_or_default()
        .iter()
        .map(|steps| render_path(steps))
        .collect();
    let destructive = (has_action(&change.actions, "delete")
        && has_action(&change.actions, "create"))
        || !replace_paths.is_empty();

    let attribute_diffs = diff_attributes(
        before.as_ref(),
        after.as_ref(),
        change.after_unknown.as_ref(),
    );
    let action = classify(
        before.is_some(),
        after.is_some(),
        attribute_diffs.is_empty(),
        destructive,
    )
    .ok_or_else(|| {
        ParseError::at_value(
            format!("resource '{}' has neither before nor after", raw.address),
            entry,
        )
    })?;

    Ok(ResourceChange {
        address: raw.address,
        module_address: address.module,
        resource_type: raw.resource_type,
        name: raw.name,
        action,
        attribute_diffs,
        replace_paths,
    })
}

/// Derives the action from the presence of both sides and whether any
/// attribute differs. Unset (`null`) attributes never count as a difference.
const fn classify(
    has_before: bool,
    has_after: bool,
    unchanged: bool,
    destructive: bool,
) -> Option<Action> {
    let action = match (has_before, has_after) {
        (false, false) => return None,
        (false, true) => Action::Create,
        (true, false) => Action::Delete,
        (true, true) if unchanged => Action::NoOp,
        (true, true) if destructive => Action::Replace,
        (true, true) => Action::Update,
    };
    Some(action)
}

fn has_action(actions: &[String], name: &str) -> bool {
    actions.iter().any(|a| a == name)
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}
