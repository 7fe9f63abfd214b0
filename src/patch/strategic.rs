//! Structural ("strategic") merge patch creation and application.
//!
//! Lists carrying merge metadata are diffed element-wise: lists of maps by
//! their merge key, lists of primitives as sets. Removed elements are emitted
//! as `{"$patch": "delete", <key>: <id>}` directives and removed primitives
//! under a `$deleteFromPrimitiveList/<field>` key. Everything else follows
//! JSON merge patch rules.

use serde_json::{Map, Value};

use crate::error::{InputError, Result};

use super::meta::{MergeStrategy, PatchMeta};

const DIRECTIVE: &str = "$patch";
const DELETE_FROM_PRIMITIVE_LIST: &str = "$deleteFromPrimitiveList/";

#[derive(Debug, Clone, Copy, Default)]
struct DiffOptions {
    ignore_deletions: bool,
    ignore_changes_and_additions: bool,
}

/// Computes a two-way structural patch from `original` to `modified`.
///
/// # Errors
///
/// Returns an error if a merged list element lacks its merge key.
pub fn create_two_way_merge_patch(original: &Value, modified: &Value, meta: &PatchMeta) -> Result<Value> {
    let patch = diff_values(original, modified, meta, DiffOptions::default())?;
    Ok(Value::Object(patch))
}

/// Computes a three-way structural patch.
///
/// Additions and changes are taken from `current -> modified`, deletions from
/// `original -> modified`; the two are merged. Conflicts with the live state
/// are overwritten in favour of `modified`.
///
/// # Errors
///
/// Returns an error if a merged list element lacks its merge key.
pub fn create_three_way_merge_patch(
    original: Option<&Value>,
    modified: &Value,
    current: &Value,
    meta: &PatchMeta,
) -> Result<Value> {
    let empty = Value::Object(Map::new());
    let original = original.unwrap_or(&empty);

    let delta = diff_values(
        current,
        modified,
        meta,
        DiffOptions {
            ignore_deletions: true,
            ignore_changes_and_additions: false,
        },
    )?;
    let deletions = diff_values(
        original,
        modified,
        meta,
        DiffOptions {
            ignore_deletions: false,
            ignore_changes_and_additions: true,
        },
    )?;

    Ok(Value::Object(merge_patch_maps(deletions, delta, meta)))
}

fn diff_values(original: &Value, modified: &Value, meta: &PatchMeta, opts: DiffOptions) -> Result<Map<String, Value>> {
    let empty = Map::new();
    let original = original.as_object().unwrap_or(&empty);
    let modified = modified.as_object().unwrap_or(&empty);
    diff_maps(original, modified, meta, opts)
}

fn diff_maps(
    original: &Map<String, Value>,
    modified: &Map<String, Value>,
    meta: &PatchMeta,
    opts: DiffOptions,
) -> Result<Map<String, Value>> {
    let mut patch = Map::new();

    for (key, mod_val) in modified {
        let Some(orig_val) = original.get(key) else {
            if !opts.ignore_changes_and_additions {
                patch.insert(key.clone(), mod_val.clone());
            }
            continue;
        };

        let field = meta.get(key);
        let replace = field.is_some_and(|f| f.strategy == MergeStrategy::Replace);

        match (orig_val, mod_val) {
            (Value::Object(orig), Value::Object(modi)) if !replace => {
                let sub = diff_maps(orig, modi, meta.nested(key), opts)?;
                if !sub.is_empty() {
                    patch.insert(key.clone(), Value::Object(sub));
                }
            }
            (Value::Array(orig), Value::Array(modi)) if field.is_some_and(|f| f.merges_by_key()) => {
                let merge_key = field.and_then(|f| f.merge_key.as_deref()).unwrap_or_default();
                let items = diff_keyed_lists(key, orig, modi, merge_key, meta.nested(key), opts)?;
                if !items.is_empty() {
                    patch.insert(key.clone(), Value::Array(items));
                }
            }
            (Value::Array(orig), Value::Array(modi)) if field.is_some_and(|f| f.merges_as_set()) => {
                diff_primitive_lists(key, orig, modi, opts, &mut patch);
            }
            _ => {
                if orig_val != mod_val && !opts.ignore_changes_and_additions {
                    patch.insert(key.clone(), mod_val.clone());
                }
            }
        }
    }

    if !opts.ignore_deletions {
        for key in original.keys() {
            if !modified.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    Ok(patch)
}

fn merge_key_value<'a>(field: &str, item: &'a Value, merge_key: &str) -> Result<&'a Value> {
    item.as_object()
        .and_then(|m| m.get(merge_key))
        .ok_or_else(|| {
            InputError::Invalid {
                message: format!("element of list `{field}` does not contain merge key `{merge_key}`"),
            }
            .into()
        })
}

fn find_by_key<'a>(list: &'a [Value], merge_key: &str, id: &Value) -> Option<&'a Map<String, Value>> {
    list.iter()
        .filter_map(Value::as_object)
        .find(|m| m.get(merge_key) == Some(id))
}

fn diff_keyed_lists(
    field: &str,
    original: &[Value],
    modified: &[Value],
    merge_key: &str,
    meta: &PatchMeta,
    opts: DiffOptions,
) -> Result<Vec<Value>> {
    let mut items = Vec::new();

    for item in modified {
        let id = merge_key_value(field, item, merge_key)?;
        match (find_by_key(original, merge_key, id), item.as_object()) {
            (Some(orig), Some(modi)) => {
                let mut sub = diff_maps(orig, modi, meta, opts)?;
                if !sub.is_empty() {
                    sub.insert(merge_key.to_string(), id.clone());
                    items.push(Value::Object(sub));
                }
            }
            _ => {
                if !opts.ignore_changes_and_additions {
                    items.push(item.clone());
                }
            }
        }
    }

    if !opts.ignore_deletions {
        for item in original {
            let id = merge_key_value(field, item, merge_key)?;
            if find_by_key(modified, merge_key, id).is_none() {
                let mut directive = Map::new();
                directive.insert(DIRECTIVE.to_string(), Value::String(String::from("delete")));
                directive.insert(merge_key.to_string(), id.clone());
                items.push(Value::Object(directive));
            }
        }
    }

    Ok(items)
}

fn diff_primitive_lists(
    field: &str,
    original: &[Value],
    modified: &[Value],
    opts: DiffOptions,
    patch: &mut Map<String, Value>,
) {
    if !opts.ignore_changes_and_additions {
        let additions: Vec<Value> = modified
            .iter()
            .filter(|v| !original.contains(v))
            .cloned()
            .collect();
        if !additions.is_empty() {
            patch.insert(field.to_string(), Value::Array(additions));
        }
    }

    if !opts.ignore_deletions {
        let deletions: Vec<Value> = original
            .iter()
            .filter(|v| !modified.contains(v))
            .cloned()
            .collect();
        if !deletions.is_empty() {
            patch.insert(format!("{DELETE_FROM_PRIMITIVE_LIST}{field}"), Value::Array(deletions));
        }
    }
}

/// Merges two patches computed against the same metadata.
fn merge_patch_maps(mut base: Map<String, Value>, overlay: Map<String, Value>, meta: &PatchMeta) -> Map<String, Value> {
    for (key, value) in overlay {
        let field = meta.get(&key);
        let merged = match (base.remove(&key), value) {
            (Some(Value::Object(left)), Value::Object(right)) => {
                Value::Object(merge_patch_maps(left, right, meta.nested(&key)))
            }
            (Some(Value::Array(mut left)), Value::Array(right)) if field.is_some_and(|f| f.merges_by_key()) => {
                let merge_key = field.and_then(|f| f.merge_key.as_deref()).unwrap_or_default();
                merge_keyed_patch_lists(&mut left, right, merge_key, meta.nested(&key));
                Value::Array(left)
            }
            (Some(Value::Array(mut left)), Value::Array(right)) if field.is_some_and(|f| f.merges_as_set()) => {
                for item in right {
                    if !left.contains(&item) {
                        left.push(item);
                    }
                }
                Value::Array(left)
            }
            (_, value) => value,
        };
        base.insert(key, merged);
    }
    base
}

fn merge_keyed_patch_lists(left: &mut Vec<Value>, right: Vec<Value>, merge_key: &str, meta: &PatchMeta) {
    for item in right {
        let Value::Object(item_map) = item else {
            left.push(item);
            continue;
        };
        let id = item_map.get(merge_key).cloned();
        let existing = left.iter_mut().find(|v| {
            v.as_object()
                .is_some_and(|m| !m.contains_key(DIRECTIVE) && m.get(merge_key) == id.as_ref())
        });
        match existing {
            Some(Value::Object(existing)) if !item_map.contains_key(DIRECTIVE) => {
                let merged = merge_patch_maps(std::mem::take(existing), item_map, meta);
                *existing = merged;
            }
            _ => left.push(Value::Object(item_map)),
        }
    }
}

/// Applies a structural patch to a document.
///
/// # Errors
///
/// Returns an error if the patch is not a JSON object.
pub fn apply_patch(original: &Value, patch: &Value, meta: &PatchMeta) -> Result<Value> {
    let Value::Object(patch_map) = patch else {
        return Err(InputError::Invalid {
            message: String::from("structural merge patch must be a JSON object"),
        }
        .into());
    };

    let mut result = match original {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    apply_map(&mut result, patch_map, meta);
    Ok(Value::Object(result))
}

fn apply_map(target: &mut Map<String, Value>, patch: &Map<String, Value>, meta: &PatchMeta) {
    for (key, value) in patch {
        if let Some(field) = key.strip_prefix(DELETE_FROM_PRIMITIVE_LIST) {
            if let (Some(Value::Array(list)), Some(removals)) = (target.get_mut(field), value.as_array()) {
                list.retain(|item| !removals.contains(item));
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        let field = meta.get(key);
        let replace = field.is_some_and(|f| f.strategy == MergeStrategy::Replace);

        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(sub) => match sub.get(DIRECTIVE).and_then(Value::as_str) {
                Some("delete") => {
                    target.remove(key);
                }
                Some("replace") => {
                    let mut fresh = sub.clone();
                    fresh.remove(DIRECTIVE);
                    target.insert(key.clone(), Value::Object(fresh));
                }
                _ => match target.get_mut(key) {
                    Some(Value::Object(existing)) if !replace => apply_map(existing, sub, meta.nested(key)),
                    _ => {
                        let mut fresh = Map::new();
                        apply_map(&mut fresh, sub, meta.nested(key));
                        target.insert(key.clone(), Value::Object(fresh));
                    }
                },
            },
            Value::Array(items) => match (target.get_mut(key), field) {
                (Some(Value::Array(existing)), Some(f)) if f.merges_by_key() => {
                    let merge_key = f.merge_key.as_deref().unwrap_or_default();
                    apply_keyed_list(existing, items, merge_key, meta.nested(key));
                }
                (Some(Value::Array(existing)), Some(f)) if f.merges_as_set() => {
                    for item in items {
                        if !existing.contains(item) {
                            existing.push(item.clone());
                        }
                    }
                }
                _ => {
                    let cleaned: Vec<Value> = items
                        .iter()
                        .filter(|v| v.get(DIRECTIVE).is_none())
                        .cloned()
                        .collect();
                    target.insert(key.clone(), Value::Array(cleaned));
                }
            },
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

fn apply_keyed_list(existing: &mut Vec<Value>, items: &[Value], merge_key: &str, meta: &PatchMeta) {
    for item in items {
        let Some(item_map) = item.as_object() else {
            existing.push(item.clone());
            continue;
        };
        let id = item_map.get(merge_key);

        if item_map.get(DIRECTIVE).and_then(Value::as_str) == Some("delete") {
            existing.retain(|v| v.get(merge_key) != id);
            continue;
        }

        let found = existing
            .iter_mut()
            .find(|v| id.is_some() && v.get(merge_key) == id);
        match found {
            Some(Value::Object(target)) => apply_map(target, item_map, meta),
            _ => {
                let mut fresh = Map::new();
                apply_map(&mut fresh, item_map, meta);
                existing.push(Value::Object(fresh));
            }
        }
    }
}
