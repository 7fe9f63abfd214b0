//! Patch strategy selection.
//!
//! The strategy is resolved once per apply call from the type catalog and,
//! for structured kinds, the optional schema-description service. Computing
//! the patch afterwards never looks at the kind again.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::object::GroupVersionKind;
use crate::resource::{TypeCatalog, TypeEntry};

use super::merge::{self, Precondition};
use super::meta::PatchMeta;
use super::{PatchEnvelope, PatchType, strategic};

/// Schema-description service providing field-merge metadata per kind.
#[cfg_attr(test, mockall::automock)]
pub trait SchemaSource: Send + Sync {
    /// Returns the field-merge metadata of a kind, `None` if it is not described.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be consulted.
    fn lookup(&self, gvk: &GroupVersionKind) -> Result<Option<PatchMeta>>;
}

/// Where structural metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaSource {
    /// The schema-description service.
    Schema,
    /// Metadata compiled into the type catalog.
    Compiled,
}

/// How a patch is computed for a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStrategy {
    /// JSON merge patch guarded by identity preconditions.
    Unstructured,
    /// Structural merge patch driven by field-merge metadata.
    Structural {
        /// Field-merge metadata.
        meta: PatchMeta,
        /// Origin of `meta`.
        source: MetaSource,
    },
}

impl PatchStrategy {
    /// Selects the strategy for a kind.
    ///
    /// Unregistered and unstructured kinds get [`PatchStrategy::Unstructured`].
    /// Structured kinds prefer metadata from `schema` and fall back to the
    /// compiled metadata when the lookup fails or has nothing.
    #[must_use]
    pub fn resolve(catalog: &TypeCatalog, schema: Option<&dyn SchemaSource>, gvk: &GroupVersionKind) -> Self {
        let compiled = match catalog.entry(gvk) {
            None | Some(TypeEntry::Unstructured) => {
                debug!("Using JSON merge patch for {}", gvk);
                return Self::Unstructured;
            }
            Some(TypeEntry::Structured(meta)) => meta,
        };

        if let Some(schema) = schema {
            match schema.lookup(gvk) {
                Ok(Some(meta)) if !meta.is_empty() => {
                    debug!("Using schema merge metadata for {}", gvk);
                    return Self::Structural {
                        meta,
                        source: MetaSource::Schema,
                    };
                }
                Ok(_) => debug!("Schema has no merge metadata for {}", gvk),
                Err(e) => warn!("Schema lookup for {} failed, using compiled metadata: {}", gvk, e),
            }
        }

        Self::Structural {
            meta: compiled.clone(),
            source: MetaSource::Compiled,
        }
    }

    /// Returns the wire format this strategy produces.
    #[must_use]
    pub const fn patch_type(&self) -> PatchType {
        match self {
            Self::Unstructured => PatchType::JsonMerge,
            Self::Structural { .. } => PatchType::StrategicMerge,
        }
    }

    /// Computes the three-way patch between the encoded documents.
    ///
    /// An absent or empty `original` means there is no prior configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be decoded, if an identity
    /// precondition fails (unstructured) or if list metadata is violated
    /// (structural).
    pub fn compute(&self, original: Option<&[u8]>, modified: &[u8], current: &[u8]) -> Result<PatchEnvelope> {
        let original: Option<Value> = match original.filter(|b| !b.is_empty()) {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let modified: Value = serde_json::from_slice(modified)?;
        let current: Value = serde_json::from_slice(current)?;

        let patch = match self {
            Self::Unstructured => merge::create_three_way_merge_patch(
                original.as_ref(),
                &modified,
                &current,
                &Precondition::IDENTITY,
            )?,
            Self::Structural { meta, .. } => {
                strategic::create_three_way_merge_patch(original.as_ref(), &modified, &current, meta)?
            }
        };

        Ok(PatchEnvelope::new(self.patch_type(), serde_json::to_vec(&patch)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApplyKitError, TransportError};
    use crate::patch::is_empty_patch;
    use mockall::predicate::eq;

    fn pod() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Pod")
    }

    #[test]
    fn test_unregistered_kind_is_unstructured() {
        let mut schema = MockSchemaSource::new();
        schema.expect_lookup().times(0);

        let gvk = GroupVersionKind::new("example.com", "v1", "Widget");
        let strategy = PatchStrategy::resolve(&TypeCatalog::builtin(), Some(&schema), &gvk);
        assert_eq!(strategy, PatchStrategy::Unstructured);
        assert_eq!(strategy.patch_type(), PatchType::JsonMerge);
    }

    #[test]
    fn test_schema_metadata_preferred() {
        let described = PatchMeta::new().field("spec", PatchMeta::new().set_list("tags"));
        let returned = described.clone();

        let mut schema = MockSchemaSource::new();
        schema
            .expect_lookup()
            .with(eq(pod()))
            .times(1)
            .returning(move |_| Ok(Some(returned.clone())));

        let strategy = PatchStrategy::resolve(&TypeCatalog::builtin(), Some(&schema), &pod());
        assert_eq!(
            strategy,
            PatchStrategy::Structural {
                meta: described,
                source: MetaSource::Schema
            }
        );
    }

    #[test]
    fn test_schema_failure_falls_back_to_compiled() {
        let mut schema = MockSchemaSource::new();
        schema
            .expect_lookup()
            .returning(|_| Err(ApplyKitError::from(TransportError::network("connection refused"))));

        let strategy = PatchStrategy::resolve(&TypeCatalog::builtin(), Some(&schema), &pod());
        assert!(matches!(
            strategy,
            PatchStrategy::Structural {
                source: MetaSource::Compiled,
                ..
            }
        ));

        let mut empty = MockSchemaSource::new();
        empty.expect_lookup().returning(|_| Ok(None));
        let strategy = PatchStrategy::resolve(&TypeCatalog::builtin(), Some(&empty), &pod());
        assert!(matches!(
            strategy,
            PatchStrategy::Structural {
                source: MetaSource::Compiled,
                ..
            }
        ));
    }

    #[test]
    fn test_unstructured_compute() {
        let envelope = PatchStrategy::Unstructured
            .compute(
                Some(br#"{"a":1,"b":2}"#),
                br#"{"a":1,"b":3}"#,
                br#"{"a":1,"b":2,"c":9}"#,
            )
            .expect("patch");
        assert_eq!(envelope.patch_type, PatchType::JsonMerge);
        assert_eq!(envelope.bytes, br#"{"b":3}"#.to_vec());
    }

    #[test]
    fn test_structural_compute_without_changes_is_empty() {
        let strategy = PatchStrategy::resolve(&TypeCatalog::builtin(), None, &pod());
        let doc = br#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":"p"},"spec":{"containers":[{"name":"app"}]}}"#;

        let envelope = strategy.compute(Some(doc), doc, doc).expect("patch");
        assert_eq!(envelope.patch_type, PatchType::StrategicMerge);
        assert!(is_empty_patch(&envelope.bytes));
    }

    #[test]
    fn test_identity_change_is_rejected() {
        let err = PatchStrategy::Unstructured
            .compute(
                Some(br#"{"kind":"Widget","metadata":{"name":"a"}}"#),
                br#"{"kind":"Widget","metadata":{"name":"b"}}"#,
                br#"{"kind":"Widget","metadata":{"name":"a"}}"#,
            )
            .expect_err("name change");
        assert!(matches!(err, ApplyKitError::Precondition(_)));
    }
}
