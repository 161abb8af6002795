//! State document indexing.
//!
//! Reads the output of `terraform show -json` (without a plan file) and
//! builds a [`ResourceIndex`] from the root module and every nested child
//! module.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use super::types::{ResourceIndex, ResourceMode, StateResource};
use crate::changeset::ResourceAddress;
use crate::error::ParseError;

#[derive(Debug, Deserialize)]
struct RawResource {
    address: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    values: Option<Value>,
}

/// Indexer for structured state output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateIndexer;

impl StateIndexer {
    /// Creates a new indexer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Indexes a state document from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON or the document is malformed.
    pub fn index(&self, input: &str) -> Result<ResourceIndex, ParseError> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| ParseError::new(format!("invalid state JSON: {e}"), input))?;
        self.index_value(&value)
    }

    /// Indexes an already decoded state document.
    ///
    /// # Errors
    ///
    /// Returns an error on missing or mistyped fields or a duplicate address.
    pub fn index_value(&self, document: &Value) -> Result<ResourceIndex, ParseError> {
        let Some(object) = document.as_object() else {
            return Err(ParseError::at_value(
                "state document is not a JSON object",
                document,
            ));
        };

        let root = match object.get("values") {
            None | Some(Value::Null) => return Ok(ResourceIndex::default()),
            Some(Value::Object(values)) => values.get("root_module"),
            Some(other) => {
                return Err(ParseError::at_value("'values' is not an object", other));
            }
        };

        let mut resources = Vec::new();
        if let Some(root) = root.filter(|v| !v.is_null()) {
            collect_module(root, &mut resources)?;
        }

        let mut seen = HashSet::new();
        for resource in &resources {
            if !seen.insert(resource.address.as_str()) {
                return Err(ParseError::new(
                    format!("duplicate resource address '{}'", resource.address),
                    &resource.address,
                ));
            }
        }

        let index = ResourceIndex::from_resources(resources);
        debug!(
            "Indexed state: {} resources across {} types",
            index.len(),
            index.groups().len()
        );
        Ok(index)
    }
}

/// Collects resources of a module and, recursively, its children.
fn collect_module(module: &Value, out: &mut Vec<StateResource>) -> Result<(), ParseError> {
    let Some(module) = module.as_object() else {
        return Err(ParseError::at_value("module is not an object", module));
    };

    for entry in array_field(module, "resources")? {
        out.push(build_resource(entry)?);
    }
    for child in array_field(module, "child_modules")? {
        collect_module(child, out)?;
    }
    Ok(())
}

fn build_resource(entry: &Value) -> Result<StateResource, ParseError> {
    let raw: RawResource = serde_json::from_value(entry.clone())
        .map_err(|e| ParseError::at_value(format!("invalid state resource: {e}"), entry))?;

    let mode = match raw.mode.as_deref() {
        None | Some("managed") => ResourceMode::Managed,
        Some("data") => ResourceMode::Data,
        Some(other) => {
            return Err(ParseError::at_value(
                format!("unknown resource mode '{other}'"),
                entry,
            ));
        }
    };

    let attributes = match raw.values {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ParseError::at_value(
                format!("attributes of '{}' are not an object", raw.address),
                entry,
            ));
        }
    };

    let address = ResourceAddress::parse(&raw.address)?;

    Ok(StateResource {
        address: raw.address,
        resource_type: raw.resource_type,
        name: raw.name,
        mode,
        module_address: address.module,
        attributes,
    })
}

fn array_field<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], ParseError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ParseError::at_value(
            format!("'{key}' is not an array"),
            other,
        )),
    }
}
