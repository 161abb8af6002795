//! Plan content signatures.
//!
//! A signature identifies what a plan would do, independent of the order the
//! tool listed resources in. Two plans with equal signatures propose the same
//! changes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::ResourceChange;

/// SHA-256 over the sorted resource changes of a plan, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PlanSignature(String);

impl PlanSignature {
    /// Computes the signature of a set of resource changes.
    #[must_use]
    pub fn compute<'a>(resources: impl IntoIterator<Item = &'a ResourceChange>) -> Self {
        let mut sorted: Vec<&ResourceChange> = resources.into_iter().collect();
        sorted.sort_by(|a, b| a.address.cmp(&b.address));

        let mut hasher = Sha256::new();
        for resource in sorted {
            hasher.update(resource.address.as_bytes());
            hasher.update([0]);
            hasher.update(resource.action.to_string().as_bytes());
            hasher.update([0]);
            for (path, diff) in &resource.attribute_diffs {
                hasher.update(path.as_bytes());
                hasher.update(canonical(diff.before.as_ref()).as_bytes());
                hasher.update(canonical(diff.after.as_ref()).as_bytes());
                hasher.update([u8::from(diff.after_unknown)]);
            }
            for path in &resource.replace_paths {
                hasher.update(path.as_bytes());
            }
            hasher.update([0xff]);
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for PlanSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Hex SHA-256 of raw bytes, used to fingerprint the saved plan artifact.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn canonical(value: Option<&serde_json::Value>) -> String {
    value.map_or_else(|| "~".to_string(), serde_json::Value::to_string)
}
