//! Change set model and plan parsing.
//!
//! This module converts the structured plan output of the provisioning tool
//! into a [`ChangeSet`]: resources grouped by module, classified into
//! actions, with per-attribute diffs and a content signature.

mod address;
mod diff;
mod parser;
mod signature;
mod types;

pub use address::ResourceAddress;
pub use diff::diff_attributes;
pub use parser::ChangeSetParser;
pub use signature::{digest_bytes, PlanSignature};
pub use types::{Action, AttributeDiff, ChangeSet, ChangeSummary, ModuleNode, ResourceChange};
