//! Structural attribute diffing.
//!
//! Compares the before/after attribute documents of one resource and produces
//! one [`AttributeDiff`] per changed leaf path. Containers whose shape changed
//! (keys added or removed, different length) also get an entry of their own.
//! JSON `null` inside an attribute document means "unset" and is treated as
//! absent.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::types::AttributeDiff;

/// Computes attribute diffs between two optional documents.
///
/// `after_unknown` mirrors the after document and holds `true` at paths whose
/// value will only be known after apply.
#[must_use]
pub fn diff_attributes(
    before: Option<&Value>,
    after: Option<&Value>,
    after_unknown: Option<&Value>,
) -> BTreeMap<String, AttributeDiff> {
    let mut out = BTreeMap::new();
    walk("", before, after, after_unknown, &mut out);
    out
}

fn walk(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    unknown: Option<&Value>,
    out: &mut BTreeMap<String, AttributeDiff>,
) {
    let before = before.filter(|v| !v.is_null());
    let after = after.filter(|v| !v.is_null());

    if unknown == Some(&Value::Bool(true)) {
        record(out, path, before, after, true);
        return;
    }

    if before == after && !contains_unknown(unknown) {
        return;
    }

    match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => {
            if !path.is_empty() && set_keys(b) != set_keys(a) {
                record(out, path, before, after, false);
            }
            let unknown_obj = unknown.and_then(Value::as_object);
            for key in union_keys(Some(b), Some(a), unknown_obj) {
                walk(
                    &child_key(path, &key),
                    b.get(&key),
                    a.get(&key),
                    unknown_obj.and_then(|u| u.get(&key)),
                    out,
                );
            }
        }
        (Some(Value::Array(b)), Some(Value::Array(a))) => {
            if !path.is_empty() && b.len() != a.len() {
                record(out, path, before, after, false);
            }
            let unknown_arr = unknown.and_then(Value::as_array);
            for i in 0..b.len().max(a.len()) {
                walk(
                    &child_index(path, i),
                    b.get(i),
                    a.get(i),
                    unknown_arr.and_then(|u| u.get(i)),
                    out,
                );
            }
        }
        (None, Some(value)) if has_children(value) || contains_unknown(unknown) => {
            walk_one_side(path, value, Side::After, unknown, out);
        }
        (Some(value), None) if has_children(value) => {
            walk_one_side(path, value, Side::Before, None, out);
        }
        (None, None) => {
            if let Some(unknown_obj) = unknown.and_then(Value::as_object) {
                for (key, flag) in unknown_obj {
                    walk(&child_key(path, key), None, None, Some(flag), out);
                }
            } else if let Some(unknown_arr) = unknown.and_then(Value::as_array) {
                for (i, flag) in unknown_arr.iter().enumerate() {
                    walk(&child_index(path, i), None, None, Some(flag), out);
                }
            }
        }
        _ => record(out, path, before, after, false),
    }
}

#[derive(Clone, Copy)]
enum Side {
    Before,
    After,
}

/// Emits every leaf of a value present on only one side.
fn walk_one_side(
    path: &str,
    value: &Value,
    side: Side,
    unknown: Option<&Value>,
    out: &mut BTreeMap<String, AttributeDiff>,
) {
    match value {
        Value::Object(map) => {
            let unknown_obj = unknown.and_then(Value::as_object);
            for key in union_keys(Some(map), None, unknown_obj) {
                let (b, a) = pick(side, map.get(&key));
                walk(
                    &child_key(path, &key),
                    b,
                    a,
                    unknown_obj.and_then(|u| u.get(&key)),
                    out,
                );
            }
        }
        Value::Array(items) => {
            let unknown_arr = unknown.and_then(Value::as_array);
            for (i, item) in items.iter().enumerate() {
                let (b, a) = pick(side, Some(item));
                walk(
                    &child_index(path, i),
                    b,
                    a,
                    unknown_arr.and_then(|u| u.get(i)),
                    out,
                );
            }
        }
        _ => {
            let (b, a) = pick(side, Some(value));
            record(out, path, b, a, false);
        }
    }
}

/// Places a one-sided value on its side of a (before, after) pair.
const fn pick(side: Side, value: Option<&Value>) -> (Option<&Value>, Option<&Value>) {
    match side {
        Side::Before => (value, None),
        Side::After => (None, value),
    }
}

fn record(
    out: &mut BTreeMap<String, AttributeDiff>,
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    after_unknown: bool,
) {
    // The document itself is not an attribute.
    if path.is_empty() {
        return;
    }
    out.insert(
        path.to_string(),
        AttributeDiff {
            before: before.cloned(),
            after: after.cloned(),
            after_unknown,
        },
    );
}

fn has_children(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.values().any(|v| !v.is_null()),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

fn contains_unknown(unknown: Option<&Value>) -> bool {
    match unknown {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Object(map)) => map.values().any(|v| contains_unknown(Some(v))),
        Some(Value::Array(items)) => items.iter().any(|v| contains_unknown(Some(v))),
        _ => false,
    }
}

/// Keys holding a non-null value.
fn set_keys(map: &Map<String, Value>) -> BTreeSet<&str> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, _)| k.as_str())
        .collect()
}

fn union_keys(
    before: Option<&Map<String, Value>>,
    after: Option<&Map<String, Value>>,
    unknown: Option<&Map<String, Value>>,
) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for map in [before, after].into_iter().flatten() {
        keys.extend(map.keys().cloned());
    }
    if let Some(unknown) = unknown {
        keys.extend(
            unknown
                .iter()
                .filter(|(_, v)| contains_unknown(Some(v)))
                .map(|(k, _)| k.clone()),
        );
    }
    keys
}

fn child_key(parent: &str, key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    match (parent.is_empty(), plain) {
        (true, true) => key.to_string(),
        (false, true) => format!("{parent}.{key}"),
        (_, false) => format!("{parent}[{}]", Value::String(key.to_string())),
    }
}

fn child_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Renders a path given as steps (`["ingress", 0, "from_port"]`) in the same
/// notation used for diff keys.
pub(super) fn render_path(steps: &[Value]) -> String {
    steps.iter().fold(String::new(), |path, step| match step {
        Value::Number(n) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .map_or_else(|| format!("{path}[{n}]"), |i| child_index(&path, i)),
        Value::String(key) => child_key(&path, key),
        other => format!("{path}[{other}]"),
    })
}
