//! Clients for the versioned object store.
//!
//! This module defines the [`ObjectStore`] interface the apply engine talks
//! to, an HTTP implementation for real API servers and an in-process store
//! used by tests and dry runs.

mod memory;
mod rest;

pub use memory::{MemoryStore, Verb};
pub use rest::RestClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::object::{LiveObjectHandle, Object};
use crate::patch::PatchEnvelope;
use crate::resource::RestMapping;

/// How dependents of a deleted object are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    /// Dependents are deleted before the owner disappears.
    Foreground,
    /// The owner disappears first, dependents are collected later.
    Background,
    /// Dependents are left in place.
    Orphan,
}

/// Options of a delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// Grace period before the object is removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<i64>,
    /// Dependent handling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation_policy: Option<PropagationPolicy>,
}

impl DeleteOptions {
    /// Sets the grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, seconds: i64) -> Self {
        self.grace_period_seconds = Some(seconds);
        self
    }

    /// Sets the propagation policy.
    #[must_use]
    pub const fn with_propagation(mut self, policy: PropagationPolicy) -> Self {
        self.propagation_policy = Some(policy);
        self
    }
}

/// Objects returned by a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectList {
    /// Listed objects.
    pub items: Vec<Object>,
    /// Collection version at the time of the list.
    pub resource_version: Option<String>,
}

/// Versioned object store.
///
/// Every call is a single round-trip. Writes carrying a stale
/// `resourceVersion` fail with a conflict.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object.
    async fn get(&self, handle: &LiveObjectHandle) -> Result<Object>;

    /// Creates an object and returns the stored version.
    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Object) -> Result<Object>;

    /// Replaces an object wholesale.
    async fn replace(&self, handle: &LiveObjectHandle, object: &Object) -> Result<Object>;

    /// Sends a patch and returns the patched object.
    async fn patch(&self, handle: &LiveObjectHandle, patch: &PatchEnvelope) -> Result<Object>;

    /// Deletes an object.
    async fn delete(&self, handle: &LiveObjectHandle, options: &DeleteOptions) -> Result<()>;

    /// Lists objects of a kind, in one namespace or all of them.
    async fn list(&self, mapping: &RestMapping, namespace: Option<&str>) -> Result<ObjectList>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
