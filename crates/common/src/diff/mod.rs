// Structural diffs between two versions of an entity body.
//
// Diffs always describe how the stored (remote) body would have to change to
// become the editor's (local) body.

pub mod fields;
pub mod lines;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fields::{diff_fields, FieldChange, FieldChangeKind};
pub use lines::{diff_lines, LineChange, LineChangeKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralDiff {
    Identical,
    /// Both bodies are JSON objects.
    Fields { changes: Vec<FieldChange> },
    /// Both bodies are prose strings.
    Lines { changes: Vec<LineChange> },
    /// Bodies of different shapes, or prose too far apart to diff by line,
    /// compared as whole values.
    Replaced { remote: Value, local: Value },
}

impl StructuralDiff {
    /// Number of changed fields or lines (1 for a whole replacement).
    pub fn change_count(&self) -> usize {
        match self {
            Self::Identical => 0,
            Self::Fields { changes } => changes.len(),
            Self::Lines { changes } => changes.len(),
            Self::Replaced { .. } => 1,
        }
    }
}

pub fn structural_diff(remote: &Value, local: &Value) -> StructuralDiff {
    if remote == local {
        return StructuralDiff::Identical;
    }

    match (remote, local) {
        (Value::Object(old), Value::Object(new)) => {
            StructuralDiff::Fields { changes: diff_fields(old, new) }
        }
        (Value::String(old), Value::String(new)) => match diff_lines(old, new) {
            Some(changes) => StructuralDiff::Lines { changes },
            None => StructuralDiff::Replaced { remote: remote.clone(), local: local.clone() },
        },
        _ => StructuralDiff::Replaced { remote: remote.clone(), local: local.clone() },
    }
}
