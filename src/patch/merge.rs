//! JSON merge patch (RFC 7396) creation and application.
//!
//! The three-way variant combines the changes from the live object to the
//! desired one (additions and changes only) with the deletions from the last
//! applied configuration to the desired one (deletions only), so fields set
//! out-of-band by other actors survive while fields the caller dropped are
//! retracted.

use serde_json::{Map, Value};

use crate::error::{PreconditionError, Result};

/// A condition the final patch must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The patch must not touch the given top-level key.
    RequireKeyUnchanged(&'static str),
    /// The patch must not touch the given key under `metadata`.
    RequireMetadataKeyUnchanged(&'static str),
}

impl Precondition {
    /// Preconditions guarding the identity of an object.
    pub const IDENTITY: [Self; 3] = [
        Self::RequireKeyUnchanged("apiVersion"),
        Self::RequireKeyUnchanged("kind"),
        Self::RequireMetadataKeyUnchanged("name"),
    ];

    /// Returns true if the patch satisfies the precondition.
    #[must_use]
    pub fn holds(&self, patch: &Map<String, Value>) -> bool {
        match self {
            Self::RequireKeyUnchanged(key) => !patch.contains_key(*key),
            Self::RequireMetadataKeyUnchanged(key) => patch
                .get("metadata")
                .and_then(Value::as_object)
                .is_none_or(|metadata| !metadata.contains_key(*key)),
        }
    }

    fn field(&self) -> String {
        match self {
            Self::RequireKeyUnchanged(key) => (*key).to_string(),
            Self::RequireMetadataKeyUnchanged(key) => format!("metadata.{key}"),
        }
    }
}

/// Computes the merge patch turning `original` into `modified`.
///
/// Keys removed in `modified` are emitted as `null`; lists and scalars are
/// replaced as a whole.
#[must_use]
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => Value::Object(diff_maps(orig, modi)),
        _ => modified.clone(),
    }
}

fn diff_maps(original: &Map<String, Value>, modified: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, mod_val) in modified {
        match (original.get(key), mod_val) {
            (None, _) => {
                patch.insert(key.clone(), mod_val.clone());
            }
            (Some(Value::Object(orig)), Value::Object(modi)) => {
                let sub = diff_maps(orig, modi);
                if !sub.is_empty() {
                    patch.insert(key.clone(), Value::Object(sub));
                }
            }
            (Some(orig_val), _) => {
                if orig_val != mod_val {
                    patch.insert(key.clone(), mod_val.clone());
                }
            }
        }
    }

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

/// Applies a merge patch to a document.
#[must_use]
pub fn apply_merge_patch(target: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        return patch.clone();
    };

    let mut result = match target {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (key, value) in patch_map {
        if value.is_null() {
            result.remove(key);
            continue;
        }
        let merged = apply_merge_patch(result.get(key).unwrap_or(&Value::Null), value);
        result.insert(key.clone(), merged);
    }

    Value::Object(result)
}

/// Computes a three-way JSON merge patch.
///
/// `original` is the last applied configuration (if any), `modified` the
/// desired state and `current` the live object.
///
/// # Errors
///
/// Returns [`PreconditionError::IdentityFieldsChanged`] if the resulting patch
/// violates any of the given preconditions.
pub fn create_three_way_merge_patch(
    original: Option<&Value>,
    modified: &Value,
    current: &Value,
    preconditions: &[Precondition],
) -> Result<Value> {
    let empty = Value::Object(Map::new());
    let original = original.unwrap_or(&empty);

    let add_and_change = keep_or_delete_null(&object_of(create_merge_patch(current, modified)), false);
    let deletions = keep_or_delete_null(&object_of(create_merge_patch(original, modified)), true);

    let patch = merge_patches(deletions, add_and_change);

    let violated: Vec<String> = preconditions
        .iter()
        .filter(|p| !p.holds(&patch))
        .map(Precondition::field)
        .collect();
    if !violated.is_empty() {
        return Err(PreconditionError::IdentityFieldsChanged { fields: violated }.into());
    }

    Ok(Value::Object(patch))
}

fn object_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Keeps only the `null` entries (`keep_null`) or only the non-`null` ones.
///
/// Explicitly empty maps are values, not empty patches, and survive when
/// dropping nulls; sub-maps that filter down to nothing are omitted.
fn keep_or_delete_null(map: &Map<String, Value>, keep_null: bool) -> Map<String, Value> {
    let mut filtered = Map::new();

    for (key, value) in map {
        match value {
            Value::Null => {
                if keep_null {
                    filtered.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(sub) if sub.is_empty() => {
                if !keep_null {
                    filtered.insert(key.clone(), value.clone());
                }
            }
            Value::Object(sub) => {
                let sub = keep_or_delete_null(sub, keep_null);
                if !sub.is_empty() {
                    filtered.insert(key.clone(), Value::Object(sub));
                }
            }
            _ => {
                if !keep_null {
                    filtered.insert(key.clone(), value.clone());
                }
            }
        }
    }

    filtered
}

/// Deep-merges `overlay` into `base`; `overlay` wins on scalar clashes.
fn merge_patches(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(Value::Object(left)), Value::Object(right)) => {
                base.insert(key, Value::Object(merge_patches(left, right)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}
