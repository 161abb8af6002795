//! Recorded infrastructure state.
//!
//! This module indexes the state reported by the provisioning tool so that
//! recorded resources can be browsed by type and searched.

mod indexer;
mod types;

pub use indexer::StateIndexer;
pub use types::{ResourceIndex, ResourceMode, StateResource};
