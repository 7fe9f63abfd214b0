//! Field-merge metadata read from an OpenAPI v2 document.
//!
//! The API server publishes merge hints as vendor extensions on each
//! property: `x-kubernetes-patch-strategy` and `x-kubernetes-patch-merge-key`.
//! Definitions are matched to kinds through `x-kubernetes-group-version-kind`.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::object::GroupVersionKind;

use super::meta::{FieldMeta, MergeStrategy, PatchMeta};
use super::strategy::SchemaSource;

/// Maximum definition nesting followed when building metadata.
const MAX_DEPTH: usize = 16;

const REF_PREFIX: &str = "#/definitions/";

/// An OpenAPI v2 document indexed by kind.
#[derive(Debug, Clone, Default)]
pub struct OpenApiSchema {
    definitions: Map<String, Value>,
    by_kind: HashMap<GroupVersionKind, String>,
}

impl OpenApiSchema {
    /// Parses a document such as the one served at `/openapi/v2`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not JSON or lack `definitions`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::from_document(&document)
    }

    /// Indexes an already decoded document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document lacks a `definitions` object.
    pub fn from_document(document: &Value) -> Result<Self> {
        let definitions = document
            .get("definitions")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| TransportError::InvalidResponse {
                message: String::from("OpenAPI document has no definitions"),
            })?;

        let mut by_kind = HashMap::new();
        for (name, definition) in &definitions {
            let kinds = definition
                .get("x-kubernetes-group-version-kind")
                .and_then(Value::as_array);
            for gvk in kinds.into_iter().flatten() {
                let field = |k: &str| gvk.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
                by_kind.insert(
                    GroupVersionKind::new(field("group"), field("version"), field("kind")),
                    name.clone(),
                );
            }
        }

        debug!("Indexed {} kinds from OpenAPI document", by_kind.len());
        Ok(Self { definitions, by_kind })
    }

    /// Returns the number of kinds described by the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    /// Returns true if the document describes no kinds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    fn build(&self, definition: &str, stack: &mut Vec<String>) -> PatchMeta {
        if stack.len() >= MAX_DEPTH || stack.iter().any(|d| d == definition) {
            return PatchMeta::new();
        }
        let Some(properties) = self
            .definitions
            .get(definition)
            .and_then(|d| d.get("properties"))
            .and_then(Value::as_object)
        else {
            return PatchMeta::new();
        };

        stack.push(definition.to_string());
        let mut meta = PatchMeta::new();
        for (name, property) in properties {
            let nested = reference(property)
                .or_else(|| property.get("items").and_then(reference))
                .map(|target| self.build(target, stack))
                .unwrap_or_default();

            let field = FieldMeta {
                strategy: property
                    .get("x-kubernetes-patch-strategy")
                    .and_then(Value::as_str)
                    .map_or(MergeStrategy::Default, MergeStrategy::from_extension),
                merge_key: property
                    .get("x-kubernetes-patch-merge-key")
                    .and_then(Value::as_str)
                    .map(String::from),
                nested,
            };
            if !field.is_trivial() {
                meta.insert(name, field);
            }
        }
        stack.pop();
        meta
    }
}

fn reference(value: &Value) -> Option<&str> {
    value
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix(REF_PREFIX))
}

impl SchemaSource for OpenApiSchema {
    fn lookup(&self, gvk: &GroupVersionKind) -> Result<Option<PatchMeta>> {
        Ok(self
            .by_kind
            .get(gvk)
            .map(|definition| self.build(definition, &mut Vec::new())))
    }
}
