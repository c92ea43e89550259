// Field-level diff for structured (JSON object) entity bodies.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldChangeKind {
    Added { value: Value },
    Removed { value: Value },
    Modified { from: Value, to: Value },
}

/// A change at a dotted field path, e.g. `rationale.alternatives`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub path: String,
    #[serde(flatten)]
    pub change: FieldChangeKind,
}

/// Diffs two JSON objects field by field, recursing into nested objects.
///
/// Arrays and scalars are compared as whole values. Output is sorted by path.
pub fn diff_fields(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    diff_objects("", old, new, &mut changes);
    changes
}

fn diff_objects(
    prefix: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    changes: &mut Vec<FieldChange>,
) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    for key in keys {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match (old.get(key), new.get(key)) {
            (Some(Value::Object(old_inner)), Some(Value::Object(new_inner))) => {
                diff_objects(&path, old_inner, new_inner, changes);
            }
            (Some(old_value), Some(new_value)) if old_value != new_value => {
                changes.push(FieldChange {
                    path,
                    change: FieldChangeKind::Modified {
                        from: old_value.clone(),
                        to: new_value.clone(),
                    },
                });
            }
            (Some(_), Some(_)) => {}
            (Some(old_value), None) => changes.push(FieldChange {
                path,
                change: FieldChangeKind::Removed { value: old_value.clone() },
            }),
            (None, Some(new_value)) => changes.push(FieldChange {
                path,
                change: FieldChangeKind::Added { value: new_value.clone() },
            }),
            (None, None) => {}
        }
    }
}
