//! Change set types.
//!
//! A [`ChangeSet`] is the navigable model of one plan run: resources grouped
//! by module, each with a single [`Action`] and per-attribute diffs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::signature::PlanSignature;

/// The complete set of changes produced by one plan.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    /// Modules, root first, then children ordered by address.
    pub modules: Vec<ModuleNode>,
    /// Per-action counts.
    pub summary: ChangeSummary,
    /// Identity of the plan content.
    pub signature: PlanSignature,
    /// Plan format version reported by the tool.
    pub format_version: Option<String>,
    /// Tool version that produced the plan.
    pub terraform_version: Option<String>,
    /// When the change set was built.
    pub created_at: DateTime<Utc>,
}

/// One module instance and the resources it contains.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleNode {
    /// Module address, empty for the root module.
    pub address: String,
    /// Resource changes in plan order.
    pub resources: Vec<ResourceChange>,
}

/// The planned change of one resource instance.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceChange {
    /// Full resource address, unique within the change set.
    pub address: String,
    /// Address of the containing module, empty for root.
    pub module_address: String,
    /// Resource type (e.g. `aws_instance`).
    pub resource_type: String,
    /// Resource name within its module.
    pub name: String,
    /// Classified action.
    pub action: Action,
    /// Attribute differences keyed by path.
    pub attribute_diffs: BTreeMap<String, AttributeDiff>,
    /// Attribute paths the tool reported as forcing replacement.
    pub replace_paths: Vec<String>,
}

/// Classification of a resource change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Resource will be created.
    Create,
    /// Resource will be updated in place.
    Update,
    /// Resource will be destroyed.
    Delete,
    /// Resource will be destroyed and recreated.
    Replace,
    /// Resource is unchanged.
    NoOp,
}

/// Before/after values of one attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeDiff {
    /// Value before the change, absent on creation.
    pub before: Option<Value>,
    /// Value after the change, absent on deletion or when unknown.
    pub after: Option<Value>,
    /// The after value is only known once applied.
    pub after_unknown: bool,
}

/// Per-action counts of a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to destroy.
    pub delete: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Unchanged resources.
    pub no_op: usize,
}

impl Action {
    /// All actions, in display order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Update,
        Self::Replace,
        Self::Delete,
        Self::NoOp,
    ];

    /// Returns true unless this is [`Action::NoOp`].
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Short marker used in text output.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Replace => "-/+",
            Self::NoOp => " ",
        }
    }
}

impl ChangeSummary {
    /// Counts one resource with the given action.
    pub const fn record(&mut self, action: Action) {
        match action {
            Action::Create => self.create += 1,
            Action::Update => self.update += 1,
            Action::Delete => self.delete += 1,
            Action::Replace => self.replace += 1,
            Action::NoOp => self.no_op += 1,
        }
    }

    /// Count for one action.
    #[must_use]
    pub const fn count(&self, action: Action) -> usize {
        match action {
            Action::Create => self.create,
            Action::Update => self.update,
            Action::Delete => self.delete,
            Action::Replace => self.replace,
            Action::NoOp => self.no_op,
        }
    }

    /// Number of resources that will actually change. No-ops are excluded.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.create + self.update + self.delete + self.replace
    }

    /// Returns true if applying would change anything.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.pending() > 0
    }
}

impl ChangeSet {
    /// Iterates over every resource change across all modules.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceChange> {
        self.modules.iter().flat_map(|m| m.resources.iter())
    }

    /// Looks up a resource change by address.
    #[must_use]
    pub fn resource(&self, address: &str) -> Option<&ResourceChange> {
        self.resources().find(|r| r.address == address)
    }

    /// Looks up a module by address (empty for root).
    #[must_use]
    pub fn module(&self, address: &str) -> Option<&ModuleNode> {
        self.modules.iter().find(|m| m.address == address)
    }

    /// Returns the root module.
    #[must_use]
    pub fn root(&self) -> Option<&ModuleNode> {
        self.module("")
    }

    /// Resource changes that are not no-ops.
    pub fn actionable(&self) -> impl Iterator<Item = &ResourceChange> {
        self.resources().filter(|r| r.action.is_change())
    }

    /// Total number of resource entries, no-ops included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.iter().map(|m| m.resources.len()).sum()
    }

    /// Returns true if the plan has no resource entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleNode {
    /// Returns true for the root module.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.address.is_empty()
    }

    /// Label used when displaying the module.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.is_root() { "root" } else { &self.address }
    }
}

impl ResourceChange {
    /// Attribute diffs whose path forces replacement.
    pub fn forcing_replacement(&self) -> impl Iterator<Item = (&String, &AttributeDiff)> {
        self.attribute_diffs
            .iter()
            .filter(|(path, _)| self.replace_paths.iter().any(|p| p == *path))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes.");
        }
        write!(
            f,
            "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
            self.create, self.update, self.replace, self.delete
        )
    }
}

impl std::fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action.symbol(), self.address)?;
        if !self.attribute_diffs.is_empty() {
            write!(f, " ({} attributes)", self.attribute_diffs.len())?;
        }
        Ok(())
    }
}
