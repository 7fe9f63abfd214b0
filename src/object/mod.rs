//! Object model shared by every layer of the toolkit.
//!
//! Objects are handled as owned JSON documents so that typed and untyped
//! resources travel through the same apply path. Accessors cover the
//! metadata fields the reconciliation engine reads or writes.

mod gvk;
mod handle;

pub use gvk::{GroupKind, GroupVersion, GroupVersionKind};
pub use handle::LiveObjectHandle;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ApplyKitError, InputError, Result};

/// An API object held as an owned JSON map.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Map<String, Value>);

impl Object {
    /// Wraps a JSON value, rejecting `null` and non-object values.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::NoObjectGiven`] for `null` and
    /// [`InputError::NotAnObject`] for any other non-object value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err(InputError::NoObjectGiven.into()),
            other => Err(InputError::NotAnObject {
                found: json_type_name(&other).to_string(),
            }
            .into()),
        }
    }

    /// Serializes any value into an object.
    ///
    /// `None` and other values serializing to `null` are reported as
    /// [`InputError::NoObjectGiven`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the result is not an object.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Self::from_value(value)
    }

    /// Decodes an object from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Encodes the object as compact JSON with sorted keys.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Converts the object into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not match `T`.
    pub fn to_typed<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Borrows the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Mutably borrows the underlying map.
    pub const fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Consumes the object and returns a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns `apiVersion`.
    #[must_use]
    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    /// Returns `kind`.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    /// Parses `apiVersion` and `kind` into a [`GroupVersionKind`].
    ///
    /// # Errors
    ///
    /// Returns an error if either field is missing.
    pub fn group_version_kind(&self) -> Result<GroupVersionKind> {
        let api_version = self.api_version().ok_or_else(|| missing("apiVersion"))?;
        let kind = self.kind().filter(|k| !k.is_empty()).ok_or_else(|| missing("kind"))?;
        Ok(GroupVersion::parse(api_version).with_kind(kind))
    }

    /// Returns `metadata` if present.
    #[must_use]
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("metadata was just replaced with an object"),
        }
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns `metadata.name`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    /// Sets `metadata.name`.
    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .insert(String::from("name"), Value::String(name.to_string()));
    }

    /// Returns `metadata.generateName`.
    #[must_use]
    pub fn generate_name(&self) -> Option<&str> {
        self.metadata_str("generateName")
    }

    /// Returns `metadata.namespace`.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// Sets `metadata.namespace`.
    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert(String::from("namespace"), Value::String(namespace.to_string()));
    }

    /// Returns `metadata.uid`.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.metadata_str("uid")
    }

    /// Returns `metadata.resourceVersion`, the optimistic-concurrency token.
    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata_str("resourceVersion")
    }

    /// Sets or clears `metadata.resourceVersion`.
    pub fn set_resource_version(&mut self, version: Option<&str>) {
        let metadata = self.metadata_mut();
        match version {
            Some(v) => {
                metadata.insert(String::from("resourceVersion"), Value::String(v.to_string()));
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }

    /// Returns the annotations, or `None` if the object has none.
    ///
    /// Non-string annotation values are skipped.
    #[must_use]
    pub fn annotations(&self) -> Option<BTreeMap<String, String>> {
        string_map(self.metadata()?.get("annotations")?)
    }

    /// Replaces the annotations map.
    pub fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        let map: Map<String, Value> = annotations
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        self.metadata_mut()
            .insert(String::from("annotations"), Value::Object(map));
    }

    /// Returns a single annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()?.get("annotations")?.get(key)?.as_str()
    }

    /// Sets a single annotation, creating the map if absent.
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let metadata = self.metadata_mut();
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if !annotations.is_object() {
            *annotations = Value::Object(Map::new());
        }
        if let Value::Object(map) = annotations {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    /// Removes a single annotation and returns its value.
    ///
    /// The annotation map itself is dropped once it becomes empty.
    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        let metadata = self.0.get_mut("metadata").and_then(Value::as_object_mut)?;
        let annotations = metadata.get_mut("annotations").and_then(Value::as_object_mut)?;
        let removed = annotations.remove(key)?;
        if annotations.is_empty() {
            metadata.remove("annotations");
        }
        removed.as_str().map(String::from)
    }

    /// Returns the labels, or `None` if the object has none.
    #[must_use]
    pub fn labels(&self) -> Option<BTreeMap<String, String>> {
        string_map(self.metadata()?.get("labels")?)
    }

    /// Looks up a value by dotted path, e.g. `status.replicas`.
    #[must_use]
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |value, key| value.get(key))
    }
}

impl TryFrom<Value> for Object {
    type Error = ApplyKitError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        object.into_value()
    }
}

fn missing(field: &str) -> ApplyKitError {
    InputError::MissingField {
        field: field.to_string(),
    }
    .into()
}

fn string_map(value: &Value) -> Option<BTreeMap<String, String>> {
    let map = value.as_object()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

/// Returns the JSON type name of a value, for error messages.
pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
