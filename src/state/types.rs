//! State index types.
//!
//! These types represent the recorded infrastructure as reported by the
//! provisioning tool, grouped by resource type for browsing.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Whether a resource is managed infrastructure or a data source read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    /// Managed resource.
    #[default]
    Managed,
    /// Data source.
    Data,
}

/// One resource recorded in state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateResource {
    /// Full address, unique within the state.
    pub address: String,
    /// Resource type.
    pub resource_type: String,
    /// Resource name within its module.
    pub name: String,
    /// Managed or data.
    pub mode: ResourceMode,
    /// Containing module address, empty for root.
    pub module_address: String,
    /// Recorded attribute values.
    pub attributes: Map<String, Value>,
}

/// Resources grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceIndex {
    groups: BTreeMap<String, Vec<StateResource>>,
}

impl ResourceMode {
    /// Short marker used in text output.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Managed => "M",
            Self::Data => "D",
        }
    }
}

impl StateResource {
    /// Returns true if the query matches address, type or name.
    ///
    /// `query` must already be lowercase.
    fn matches(&self, query: &str) -> bool {
        [&self.address, &self.resource_type, &self.name]
            .iter()
            .any(|field| field.to_lowercase().contains(query))
    }
}

impl ResourceIndex {
    /// Builds an index from resources, grouping and ordering them.
    #[must_use]
    pub fn from_resources(resources: impl IntoIterator<Item = StateResource>) -> Self {
        let mut groups: BTreeMap<String, Vec<StateResource>> = BTreeMap::new();
        for resource in resources {
            groups
                .entry(resource.resource_type.clone())
                .or_default()
                .push(resource);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
        }
        Self { groups }
    }

    /// Groups keyed by resource type.
    #[must_use]
    pub const fn groups(&self) -> &BTreeMap<String, Vec<StateResource>> {
        &self.groups
    }

    /// Resources of one type.
    #[must_use]
    pub fn group(&self, resource_type: &str) -> Option<&[StateResource]> {
        self.groups.get(resource_type).map(Vec::as_slice)
    }

    /// Iterates over all resources, grouped by type.
    pub fn resources(&self) -> impl Iterator<Item = &StateResource> {
        self.groups.values().flatten()
    }

    /// Looks up a resource by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&StateResource> {
        self.resources().find(|r| r.address == address)
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Returns true if the index holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Filters the index by a case-insensitive substring.
    ///
    /// An empty or whitespace-only query returns the whole index.
    #[must_use]
    pub fn search(&self, query: &str) -> Self {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.clone();
        }

        let groups = self
            .groups
            .iter()
            .filter_map(|(kind, resources)| {
                let hits: Vec<StateResource> = resources
                    .iter()
                    .filter(|r| r.matches(&query))
                    .cloned()
                    .collect();
                (!hits.is_empty()).then(|| (kind.clone(), hits))
            })
            .collect();
        Self { groups }
    }
}
