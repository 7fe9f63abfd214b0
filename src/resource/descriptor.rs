//! Resource descriptors for custom kinds.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::object::{GroupVersion, GroupVersionKind, Object};

use super::mapper::Scope;

/// A Rust type that represents an API kind.
///
/// Types opt in explicitly; the kind is never derived from the type name
/// at runtime.
pub trait TypeTag {
    /// Kind name, e.g. `Widget`.
    const KIND: &'static str;
}

/// Describes a resource kind and derives its naming defaults.
///
/// `name` defaults to the lower-cased kind and `plural` to `name + "s"`.
/// `full_name()` (`plural.group`) is the unique registration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Singular name; empty means the lower-cased kind.
    #[serde(default)]
    pub name: String,
    /// Plural name; empty means `name + "s"`.
    #[serde(default)]
    pub plural: String,
    /// API group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Namespaced or cluster-wide.
    #[serde(default)]
    pub scope: Scope,
    /// Short names.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Kind name.
    pub kind: String,
}

impl ResourceDescriptor {
    /// Creates a namespaced descriptor with default naming.
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            plural: String::new(),
            group: group.into(),
            version: version.into(),
            scope: Scope::Namespaced,
            aliases: Vec::new(),
            kind: kind.into(),
        }
    }

    /// Creates a descriptor for a tagged type.
    #[must_use]
    pub fn for_type<T: TypeTag>(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(group, version, T::KIND)
    }

    /// Overrides the singular name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the plural name.
    #[must_use]
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Sets the scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Adds a short name.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Returns the singular name.
    #[must_use]
    pub fn get_name(&self) -> String {
        if self.name.is_empty() {
            self.kind.to_lowercase()
        } else {
            self.name.clone()
        }
    }

    /// Returns the plural name.
    #[must_use]
    pub fn get_plural(&self) -> String {
        if self.plural.is_empty() {
            format!("{}s", self.get_name())
        } else {
            self.plural.clone()
        }
    }

    /// Returns `plural.group`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.get_plural(), self.group)
    }

    /// Returns the group and version.
    #[must_use]
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(self.group.clone(), self.version.clone())
    }

    /// Returns the group, version and kind.
    #[must_use]
    pub fn group_version_kind(&self) -> GroupVersionKind {
        self.group_version().with_kind(self.kind.clone())
    }

    /// Builds the registration manifest for this kind.
    ///
    /// The stored schema preserves unknown fields, so instances are not
    /// validated server-side beyond their envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be encoded.
    pub fn definition(&self) -> Result<Object> {
        Object::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": self.full_name()},
            "spec": {
                "group": self.group,
                "scope": self.scope,
                "names": {
                    "plural": self.get_plural(),
                    "singular": self.get_name(),
                    "shortNames": self.aliases,
                    "kind": self.kind,
                },
                "versions": [{
                    "name": self.version,
                    "served": true,
                    "storage": true,
                    "schema": {
                        "openAPIV3Schema": {
                            "type": "object",
                            "x-kubernetes-preserve-unknown-fields": true,
                        }
                    }
                }]
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl TypeTag for Widget {
        const KIND: &'static str = "Widget";
    }

    #[test]
    fn test_naming_defaults() {
        let descriptor = ResourceDescriptor::for_type::<Widget>("example.com", "v1");
        assert_eq!(descriptor.get_name(), "widget");
        assert_eq!(descriptor.get_plural(), "widgets");
        assert_eq!(descriptor.full_name(), "widgets.example.com");
        assert_eq!(
            descriptor.group_version_kind(),
            GroupVersionKind::new("example.com", "v1", "Widget")
        );
    }

    #[test]
    fn test_explicit_names_win() {
        let descriptor = ResourceDescriptor::new("example.com", "v1", "Mouse")
            .with_name("mouse")
            .with_plural("mice");
        assert_eq!(descriptor.get_plural(), "mice");
        assert_eq!(descriptor.full_name(), "mice.example.com");
    }

    #[test]
    fn test_definition_manifest() {
        let descriptor = ResourceDescriptor::for_type::<Widget>("example.com", "v1alpha1")
            .with_scope(Scope::Cluster)
            .with_alias("wd");
        let definition = descriptor.definition().expect("definition");

        assert_eq!(definition.name(), Some("widgets.example.com"));
        assert_eq!(definition.kind(), Some("CustomResourceDefinition"));
        assert_eq!(definition.pointer("spec.scope"), Some(&json!("Cluster")));
        assert_eq!(definition.pointer("spec.names.plural"), Some(&json!("widgets")));
        assert_eq!(definition.pointer("spec.names.shortNames"), Some(&json!(["wd"])));
        assert_eq!(definition.pointer("spec.names.kind"), Some(&json!("Widget")));
    }
}
