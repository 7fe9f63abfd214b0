//! Manifest loading.
//!
//! Manifests are YAML (or JSON, which is valid YAML) streams of one or more
//! documents. `List` documents are flattened into their items and empty
//! documents are skipped.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ApplyKitError, InputError, Result};
use crate::object::Object;

/// Reads every object from a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a document is not an object.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Object>> {
    let path = path.as_ref();
    info!("Loading manifest from: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Parses every object from a manifest string.
///
/// # Errors
///
/// Returns [`InputError::InvalidManifest`] for malformed documents.
pub fn parse(content: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = Value::deserialize(document).map_err(|e| invalid(index, &e.to_string()))?;
        if value.is_null() {
            continue;
        }
        for item in flatten(value) {
            objects.push(Object::from_value(item).map_err(|e| invalid(index, &e.to_string()))?);
        }
    }

    debug!("Parsed {} objects", objects.len());
    Ok(objects)
}

/// Expands `*List` documents into their items.
#[must_use]
pub fn flatten(value: Value) -> Vec<Value> {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|k| k.ends_with("List"))
        && value.get("items").is_some_and(Value::is_array);
    if !is_list {
        return vec![value];
    }

    match value {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items.into_iter().flat_map(flatten).collect(),
            _ => Vec::new(),
        },
        other => vec![other],
    }
}

fn invalid(index: usize, message: &str) -> ApplyKitError {
    InputError::InvalidManifest {
        message: format!("document {index}: {message}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_document_yaml() {
        let yaml = r"
apiVersion: v1
kind: ConfigMap
metadata:
  name: one
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Secret
    metadata:
      name: two
  - apiVersion: v1
    kind: Service
    metadata:
      name: three
";
        let objects = parse(yaml).expect("parse");
        let names: Vec<_> = objects.iter().filter_map(Object::name).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }

    #[test]
    fn test_scalar_document_is_rejected() {
        let err = parse("just a string\n").expect_err("not an object");
        assert!(err.to_string().contains("document 0"));
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cm.json");
        std::fs::write(
            &path,
            r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "json"}}"#,
        )
        .expect("write");

        let objects = load_file(&path).expect("load");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name(), Some("json"));
    }
}
