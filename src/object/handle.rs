//! Addressing of server-side objects.

use crate::resource::RestMapping;

use super::Object;

/// Reference to a server-side object.
///
/// Fetched fresh at the start of every apply attempt and discarded after;
/// `version_token` changes on every successful mutation and is the basis for
/// conflict detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveObjectHandle {
    /// Namespace, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
    /// Last observed `resourceVersion`.
    pub version_token: Option<String>,
    /// REST mapping of the kind.
    pub mapping: RestMapping,
}

impl LiveObjectHandle {
    /// Creates a handle without a version token.
    #[must_use]
    pub fn new(mapping: RestMapping, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
            version_token: None,
            mapping,
        }
    }

    /// Borrows the namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Updates the identity from an object returned by the server.
    ///
    /// Server-generated names replace the requested one.
    pub fn refresh(&mut self, object: &Object) {
        if let Some(name) = object.name() {
            self.name = name.to_string();
        }
        self.version_token = object.resource_version().map(String::from);
    }

    /// Human-readable `resource/name` form for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{} in {ns}", self.mapping.resource, self.name),
            None => format!("{}/{}", self.mapping.resource, self.name),
        }
    }
}
