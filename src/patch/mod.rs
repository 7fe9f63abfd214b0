//! Patch computation for the apply engine.
//!
//! This module provides the two wire formats understood by the API server
//! (JSON merge patch and structural merge patch), the field-merge metadata
//! the structural format needs, and the selector deciding which one to use
//! for a given kind.

mod merge;
mod meta;
mod openapi;
mod strategic;
mod strategy;

pub use merge::{Precondition, apply_merge_patch, create_merge_patch, create_three_way_merge_patch};
pub use meta::{FieldMeta, MergeStrategy, PatchMeta, object_meta};
pub use openapi::OpenApiSchema;
pub use strategic::{
    apply_patch as apply_strategic_patch, create_three_way_merge_patch as create_three_way_strategic_patch,
    create_two_way_merge_patch as create_two_way_strategic_patch,
};
pub use strategy::{MetaSource, PatchStrategy, SchemaSource};

#[cfg(test)]
pub use strategy::MockSchemaSource;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchType {
    /// RFC 7396 JSON merge patch.
    JsonMerge,
    /// Structural merge patch driven by field-merge metadata.
    StrategicMerge,
}

impl PatchType {
    /// Returns the `Content-Type` header value for the format.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::JsonMerge => "application/merge-patch+json",
            Self::StrategicMerge => "application/strategic-merge-patch+json",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonMerge => write!(f, "json-merge"),
            Self::StrategicMerge => write!(f, "strategic-merge"),
        }
    }
}

/// A computed patch ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEnvelope {
    /// Wire format.
    pub patch_type: PatchType,
    /// Encoded patch body.
    pub bytes: Vec<u8>,
}

impl PatchEnvelope {
    /// Creates an envelope.
    #[must_use]
    pub const fn new(patch_type: PatchType, bytes: Vec<u8>) -> Self {
        Self { patch_type, bytes }
    }

    /// Returns the body as UTF-8 text, for logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<binary>")
    }
}

/// Known encodings of a patch that changes nothing.
///
/// The check is a byte comparison against this closed set, not a semantic
/// equality test. Any other remainder is treated as a real change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmptyPatchSet(Vec<String>);

impl EmptyPatchSet {
    /// Shapes recognised out of the box.
    pub const DEFAULT_SHAPES: [&'static str; 4] = [
        r#"{"metadata":{"creationTimestamp":null}}"#,
        "{}",
        r#"{"metadata":{"annotations":{}}}"#,
        r#"{"metadata":{"labels":{}}}"#,
    ];

    /// Adds another no-op shape.
    #[must_use]
    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.0.push(shape.into());
        self
    }

    /// Returns true if `bytes` is byte-identical to a known no-op shape.
    #[must_use]
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.0.iter().any(|shape| shape.as_bytes() == bytes)
    }

    /// Returns the configured shapes.
    #[must_use]
    pub fn shapes(&self) -> &[String] {
        &self.0
    }
}

impl Default for EmptyPatchSet {
    fn default() -> Self {
        Self(Self::DEFAULT_SHAPES.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Returns true if `bytes` is one of the default no-op patch shapes.
#[must_use]
pub fn is_empty_patch(bytes: &[u8]) -> bool {
    EmptyPatchSet::DEFAULT_SHAPES
        .iter()
        .any(|shape| shape.as_bytes() == bytes)
}
