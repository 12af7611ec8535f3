//! Field-level diff between two states of an entity instance.
//!
//! Values are normalized before comparison: `null`, a missing key and the empty
//! string all mean "no value", strings compare as-is, anything else compares by
//! its JSON rendering. A key only produces a change when its normalized values
//! differ, so the output is minimal, and every differing key produces exactly one
//! change, so it is complete.

use serde::{Deserialize, Serialize};

use crate::models::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub operation: Operation,
    pub key: String,
    pub previous: Option<String>,
    pub current: Option<String>,
}

pub fn normalize(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn lookup<'a>(
    values: &'a [(String, serde_json::Value)],
    key: &str,
) -> Option<&'a serde_json::Value> {
    values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Diff `prior` against `post`.
///
/// Output order: keys in `post` order, then keys only present in `prior` in
/// `prior` order.
pub fn diff(
    prior: &[(String, serde_json::Value)],
    post: &[(String, serde_json::Value)],
) -> Vec<Change> {
    let mut changes = Vec::new();

    for (key, value) in post {
        let before = lookup(prior, key);
        let previous = before.and_then(normalize);
        let current = normalize(value);
        if previous == current {
            continue;
        }

        let operation = match before {
            Some(_) => Operation::Modify,
            None => Operation::Create,
        };
        changes.push(Change {
            operation,
            key: key.clone(),
            previous,
            current,
        });
    }

    for (key, value) in prior {
        if lookup(post, key).is_some() {
            continue;
        }
        if let Some(previous) = normalize(value) {
            changes.push(Change {
                operation: Operation::Delete,
                key: key.clone(),
                previous: Some(previous),
                current: None,
            });
        }
    }

    changes
}
