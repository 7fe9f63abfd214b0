//! REST mappings from kinds to resource paths.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{RegistrationError, Result};
use crate::object::GroupVersionKind;

use super::descriptor::ResourceDescriptor;

/// Whether objects of a kind live in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// Objects live in a namespace.
    #[default]
    Namespaced,
    /// Objects are cluster-wide.
    Cluster,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespaced => write!(f, "Namespaced"),
            Self::Cluster => write!(f, "Cluster"),
        }
    }
}

/// How a kind is addressed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestMapping {
    /// Kind.
    pub gvk: GroupVersionKind,
    /// Plural resource name used in paths.
    pub resource: String,
    /// Scope of the kind.
    pub scope: Scope,
}

impl RestMapping {
    /// Creates a mapping.
    #[must_use]
    pub fn new(gvk: GroupVersionKind, resource: impl Into<String>, scope: Scope) -> Self {
        Self {
            gvk,
            resource: resource.into(),
            scope,
        }
    }

    /// Returns true if the kind is namespaced.
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        self.scope == Scope::Namespaced
    }
}

/// Kinds known without discovery: (group, version, kind, plural, scope).
const BUILTIN_KINDS: &[(&str, &str, &str, &str, Scope)] = &[
    ("", "v1", "Pod", "pods", Scope::Namespaced),
    ("", "v1", "Service", "services", Scope::Namespaced),
    ("", "v1", "ConfigMap", "configmaps", Scope::Namespaced),
    ("", "v1", "Secret", "secrets", Scope::Namespaced),
    ("", "v1", "ServiceAccount", "serviceaccounts", Scope::Namespaced),
    ("", "v1", "ReplicationController", "replicationcontrollers", Scope::Namespaced),
    ("", "v1", "Namespace", "namespaces", Scope::Cluster),
    ("apps", "v1", "Deployment", "deployments", Scope::Namespaced),
    ("apps", "v1", "StatefulSet", "statefulsets", Scope::Namespaced),
    ("apps", "v1", "DaemonSet", "daemonsets", Scope::Namespaced),
    ("apps", "v1", "ReplicaSet", "replicasets", Scope::Namespaced),
    ("batch", "v1", "Job", "jobs", Scope::Namespaced),
    ("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", Scope::Namespaced),
    (
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
        Scope::Cluster,
    ),
];

/// Resolves kinds to REST mappings.
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    mappings: HashMap<GroupVersionKind, RestMapping>,
}

impl RestMapper {
    /// Creates an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapper knowing the built-in kinds.
    #[must_use]
    pub fn builtin() -> Self {
        let mut mapper = Self::new();
        for (group, version, kind, plural, scope) in BUILTIN_KINDS {
            mapper.register(RestMapping::new(
                GroupVersionKind::new(*group, *version, *kind),
                *plural,
                *scope,
            ));
        }
        mapper
    }

    /// Adds or replaces a mapping.
    pub fn register(&mut self, mapping: RestMapping) {
        self.mappings.insert(mapping.gvk.clone(), mapping);
    }

    /// Adds the mapping of a custom kind.
    pub fn register_descriptor(&mut self, descriptor: &ResourceDescriptor) {
        self.register(RestMapping::new(
            descriptor.group_version_kind(),
            descriptor.get_plural(),
            descriptor.scope,
        ));
    }

    /// Looks up the mapping of a kind.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::UnknownKind`] if the kind is not registered.
    pub fn mapping_for(&self, gvk: &GroupVersionKind) -> Result<RestMapping> {
        self.mappings.get(gvk).cloned().ok_or_else(|| {
            RegistrationError::UnknownKind {
                gvk: gvk.to_string(),
            }
            .into()
        })
    }

    /// Returns true if the kind is registered.
    #[must_use]
    pub fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.mappings.contains_key(gvk)
    }
}
