//! Locating desired objects on the server.
//!
//! A desired object is normalized into a [`ResultSet`] of [`Located`]
//! entries, each carrying the object and the handle that addresses it.
//! Two strategies resolve the mapping:
//!
//! - [`LocateStrategy::Stream`] encodes the object and pushes it through the
//!   same pipeline used for manifests: `List` flattening, namespace
//!   defaulting, validation, and error collection across items.
//! - [`LocateStrategy::Direct`] resolves the single object in place.

use serde_json::Value;
use std::future::Future;
use tracing::debug;

use crate::config::ApplyConfig;
use crate::error::{ApplyKitError, Result};
use crate::manifest;
use crate::object::{LiveObjectHandle, Object};
use crate::resource::RestMapper;
use crate::validation::{Validator, validator_for};

/// How [`locate`] resolves objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocateStrategy {
    /// Encode and stream through the builder pipeline.
    #[default]
    Stream,
    /// Resolve the mapping directly.
    Direct,
}

/// An object paired with its server address.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    /// Address of the server-side object.
    pub handle: LiveObjectHandle,
    /// The desired object, namespace defaulted.
    pub object: Object,
}

/// Visitable collection of located objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    items: Vec<Located>,
}

impl ResultSet {
    /// Wraps located objects.
    #[must_use]
    pub const fn new(items: Vec<Located>) -> Self {
        Self { items }
    }

    /// Number of located objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing was located.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates the located objects.
    pub fn iter(&self) -> std::slice::Iter<'_, Located> {
        self.items.iter()
    }

    /// Runs `visitor` once per located object, in order.
    ///
    /// Stops at the first error and returns it; later objects are not
    /// visited.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `visitor`.
    pub async fn visit<F, Fut, T, E>(self, mut visitor: F) -> std::result::Result<Vec<T>, E>
    where
        F: FnMut(Located) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut outputs = Vec::with_capacity(self.items.len());
        for located in self.items {
            outputs.push(visitor(located).await?);
        }
        Ok(outputs)
    }
}

impl IntoIterator for ResultSet {
    type Item = Located;
    type IntoIter = std::vec::IntoIter<Located>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Resolves `desired` into located objects.
///
/// # Errors
///
/// With [`LocateStrategy::Stream`] every item is attempted and the failures
/// are returned together as an aggregate. [`LocateStrategy::Direct`] fails
/// on the first problem.
pub fn locate(
    config: &ApplyConfig,
    mapper: &RestMapper,
    default_namespace: &str,
    desired: &Object,
    strategy: LocateStrategy,
) -> Result<ResultSet> {
    let validator = validator_for(config.validate);
    let locator = Locator {
        mapper,
        default_namespace,
        validator: validator.as_ref(),
    };

    match strategy {
        LocateStrategy::Stream => locator.stream(desired),
        LocateStrategy::Direct => locator.direct(desired),
    }
}

struct Locator<'a> {
    mapper: &'a RestMapper,
    default_namespace: &'a str,
    validator: &'a dyn Validator,
}

impl Locator<'_> {
    fn stream(&self, desired: &Object) -> Result<ResultSet> {
        let bytes = desired.to_vec()?;
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for document in serde_json::Deserializer::from_slice(&bytes).into_iter::<Value>() {
            let document = document?;
            for value in manifest::flatten(document) {
                match Object::from_value(value).and_then(|object| self.resolve(object)) {
                    Ok(located) => items.push(located),
                    Err(err) => errors.push(err),
                }
            }
        }

        if !errors.is_empty() {
            return Err(ApplyKitError::aggregate(errors));
        }
        debug!("Located {} objects", items.len());
        Ok(ResultSet::new(items))
    }

    fn direct(&self, desired: &Object) -> Result<ResultSet> {
        let located = self.resolve(desired.clone())?;
        // Encoding once surfaces serialization problems before any request.
        located.object.to_vec()?;
        Ok(ResultSet::new(vec![located]))
    }

    fn resolve(&self, mut object: Object) -> Result<Located> {
        let gvk = object.group_version_kind()?;
        let mapping = self.mapper.mapping_for(&gvk)?;

        let namespace = if mapping.is_namespaced() {
            let namespace = object
                .namespace()
                .filter(|ns| !ns.is_empty())
                .unwrap_or(self.default_namespace)
                .to_string();
            object.set_namespace(&namespace);
            Some(namespace)
        } else {
            None
        };

        self.validator.validate(&object)?;

        let name = object.name().unwrap_or_default().to_string();
        Ok(Located {
            handle: LiveObjectHandle::new(mapping, namespace, name),
            object,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> Object {
        Object::from_value(value).expect("object")
    }

    fn config_map(name: &str) -> serde_json::Value {
        json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}})
    }

    #[test]
    fn test_direct_defaults_namespace() {
        let set = locate(
            &ApplyConfig::default(),
            &RestMapper::builtin(),
            "team-a",
            &object(config_map("settings")),
            LocateStrategy::Direct,
        )
        .expect("locate");

        assert_eq!(set.len(), 1);
        let located = set.iter().next().expect("one");
        assert_eq!(located.handle.namespace(), Some("team-a"));
        assert_eq!(located.handle.name, "settings");
        assert_eq!(located.object.namespace(), Some("team-a"));
    }

    #[test]
    fn test_cluster_scoped_has_no_namespace() {
        let ns = object(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}}));
        for strategy in [LocateStrategy::Stream, LocateStrategy::Direct] {
            let set = locate(&ApplyConfig::default(), &RestMapper::builtin(), "default", &ns, strategy)
                .expect("locate");
            let located = set.iter().next().expect("one");
            assert_eq!(located.handle.namespace(), None);
            assert_eq!(located.object.namespace(), None);
        }
    }

    #[test]
    fn test_stream_flattens_lists() {
        let list = object(json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [config_map("a"), config_map("b")]
        }));
        let set = locate(
            &ApplyConfig::default(),
            &RestMapper::builtin(),
            "default",
            &list,
            LocateStrategy::Stream,
        )
        .expect("locate");
        let names: Vec<_> = set.iter().map(|l| l.handle.name.clone()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_stream_collects_every_error() {
        let list = object(json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}},
                config_map("fine"),
                config_map("Not_Valid")
            ]
        }));
        let err = locate(
            &ApplyConfig::default(),
            &RestMapper::builtin(),
            "default",
            &list,
            LocateStrategy::Stream,
        )
        .expect_err("two failures");
        assert!(matches!(err, ApplyKitError::Aggregate(ref errors) if errors.len() == 2));
    }

    #[test]
    fn test_validation_is_gated() {
        let bad = object(config_map("Not_Valid"));
        let mut config = ApplyConfig::default();
        assert!(locate(&config, &RestMapper::builtin(), "default", &bad, LocateStrategy::Direct).is_err());

        config.validate = false;
        assert!(locate(&config, &RestMapper::builtin(), "default", &bad, LocateStrategy::Direct).is_ok());
    }

    #[tokio::test]
    async fn test_visit_stops_at_first_error() {
        let list = object(json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [config_map("a"), config_map("b"), config_map("c")]
        }));
        let set = locate(
            &ApplyConfig::default(),
            &RestMapper::builtin(),
            "default",
            &list,
            LocateStrategy::Stream,
        )
        .expect("locate");

        let mut seen = Vec::new();
        let result = set
            .visit(|located| {
                seen.push(located.handle.name.clone());
                let name = located.handle.name;
                async move {
                    if name == "b" {
                        Err::<String, _>(ApplyKitError::internal("boom"))
                    } else {
                        Ok(name)
                    }
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(seen, ["a", "b"]);
    }
}
