//! Custom resource registration.
//!
//! Registers the definition of a [`ResourceDescriptor`] with the server and
//! waits for it to be established. A definition that never becomes ready is
//! removed again.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{DeleteOptions, ObjectStore};
use crate::error::{ApplyKitError, RegistrationError, Result};
use crate::object::{GroupVersionKind, LiveObjectHandle, Object};
use crate::resource::{ResourceDescriptor, RestMapper, RestMapping};
use crate::wait::{checkpoint, pause};

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time allowed for a definition to become established.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Registers resource definitions.
pub struct Registrar {
    store: Arc<dyn ObjectStore>,
    mapping: RestMapping,
    interval: Duration,
    timeout: Duration,
    token: CancellationToken,
}

impl Registrar {
    /// Creates a registrar with the default poll interval and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `mapper` does not know the definition kind.
    pub fn new(store: Arc<dyn ObjectStore>, mapper: &RestMapper) -> Result<Self> {
        let gvk = GroupVersionKind::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition");
        Ok(Self {
            store,
            mapping: mapper.mapping_for(&gvk)?,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            token: CancellationToken::new(),
        })
    }

    /// Sets the readiness poll interval and timeout.
    #[must_use]
    pub const fn with_poll(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }

    /// Stops polling when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Creates or updates the definition and waits until it is established.
    ///
    /// # Errors
    ///
    /// Returns the create or update error, or the readiness error. When the
    /// definition cannot be removed after a failed wait, both errors are
    /// returned as an aggregate.
    pub async fn register(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let definition = descriptor.definition()?;
        let handle = LiveObjectHandle::new(self.mapping.clone(), None, descriptor.full_name());

        self.create_or_update(&handle, &definition).await?;

        let Err(err) = self.wait_established(&handle).await else {
            info!("Registered {}", descriptor.full_name());
            return Ok(());
        };

        warn!("Removing definition {}: {}", descriptor.full_name(), err);
        match self.store.delete(&handle, &DeleteOptions::default()).await {
            Ok(()) => Err(err),
            Err(delete_err) => Err(ApplyKitError::aggregate(vec![err, delete_err])),
        }
    }

    async fn create_or_update(&self, handle: &LiveObjectHandle, definition: &Object) -> Result<()> {
        checkpoint(&self.token, "register")?;
        match self.store.create(&self.mapping, None, definition).await {
            Ok(_) => {
                debug!("Created definition {}", handle.name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                let current = self.store.get(handle).await?;
                // TODO: compare with the live definition and skip identical updates.
                let mut update = definition.clone();
                update.set_resource_version(current.resource_version());
                self.store.replace(handle, &update).await?;
                debug!("Updated definition {}", handle.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_established(&self, handle: &LiveObjectHandle) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            pause(self.interval, &self.token, "wait for definition").await?;
            let definition = self.store.get(handle).await?;
            if is_established(&definition, &handle.name) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RegistrationError::NotReady {
                    name: handle.name.clone(),
                }
                .into());
            }
        }
    }
}

/// Checks the `Established` condition, logging rejected names on the way.
fn is_established(definition: &Object, name: &str) -> bool {
    let Some(conditions) = definition.pointer("status.conditions").and_then(Value::as_array) else {
        return false;
    };

    let mut established = false;
    for condition in conditions {
        let field = |key: &str| condition.get(key).and_then(Value::as_str).unwrap_or_default();
        match (field("type"), field("status")) {
            ("Established", "True") => established = true,
            ("NamesAccepted", "False") => warn!("Name conflict for {}: {}", name, field("reason")),
            _ => {}
        }
    }
    established
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryStore, Verb};
    use crate::error::ApiError;
    use serde_json::json;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new("example.com", "v1", "Widget")
    }

    fn registrar(store: &Arc<MemoryStore>) -> Registrar {
        Registrar::new(store.clone(), &RestMapper::builtin())
            .expect("registrar")
            .with_poll(Duration::from_millis(1), Duration::from_millis(200))
    }

    fn definitions() -> RestMapping {
        RestMapper::builtin()
            .mapping_for(&GroupVersionKind::new(
                "apiextensions.k8s.io",
                "v1",
                "CustomResourceDefinition",
            ))
            .expect("mapping")
    }

    /// Marks the definition established a few times while the registrar polls.
    fn establish_soon(store: Arc<MemoryStore>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(2)).await;
                let _ = store
                    .modify(&definitions(), None, "widgets.example.com", |o| {
                        o.as_map_mut().insert(
                            String::from("status"),
                            json!({"conditions": [
                                {"type": "NamesAccepted", "status": "True"},
                                {"type": "Established", "status": "True"}
                            ]}),
                        );
                    })
                    .await;
            }
        })
    }

    #[test]
    fn test_is_established() {
        let object = |status: serde_json::Value| {
            Object::from_value(json!({"metadata": {"name": "d"}, "status": status})).expect("object")
        };
        assert!(!is_established(&object(json!({})), "d"));
        assert!(!is_established(
            &object(json!({"conditions": [{"type": "Established", "status": "False"}]})),
            "d"
        ));
        assert!(is_established(
            &object(json!({"conditions": [
                {"type": "NamesAccepted", "status": "False", "reason": "Conflict"},
                {"type": "Established", "status": "True"}
            ]})),
            "d"
        ));
    }

    #[tokio::test]
    async fn test_register_creates_and_waits() {
        let store = Arc::new(MemoryStore::default());
        let establisher = establish_soon(store.clone());

        registrar(&store).register(&descriptor()).await.expect("register");
        establisher.await.expect("establisher");

        let stored = store
            .stored(&definitions(), None, "widgets.example.com")
            .await
            .expect("stored");
        assert_eq!(stored.pointer("spec.names.plural"), Some(&json!("widgets")));
        assert_eq!(store.calls(Verb::Replace).await, 0);
    }

    #[tokio::test]
    async fn test_existing_definition_is_replaced() {
        let store = Arc::new(MemoryStore::default());
        let mut existing = descriptor().definition().expect("definition");
        existing.as_map_mut().insert(String::from("spec"), json!({"group": "old"}));
        store
            .create(&definitions(), None, &existing)
            .await
            .expect("seed");

        let establisher = establish_soon(store.clone());
        registrar(&store).register(&descriptor()).await.expect("register");
        establisher.await.expect("establisher");

        assert_eq!(store.calls(Verb::Replace).await, 1);
        let stored = store
            .stored(&definitions(), None, "widgets.example.com")
            .await
            .expect("stored");
        assert_eq!(stored.pointer("spec.group"), Some(&json!("example.com")));
    }

    #[tokio::test]
    async fn test_timeout_removes_definition() {
        let store = Arc::new(MemoryStore::default());
        let registrar = Registrar::new(store.clone(), &RestMapper::builtin())
            .expect("registrar")
            .with_poll(Duration::from_millis(1), Duration::from_millis(10));

        let err = registrar.register(&descriptor()).await.expect_err("never ready");
        assert!(matches!(err, ApplyKitError::Registration(RegistrationError::NotReady { .. })));
        assert!(store.stored(&definitions(), None, "widgets.example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_rollback_aggregates() {
        let store = Arc::new(MemoryStore::default());
        store
            .fail_always(Verb::Delete, |name| {
                ApiError::Status {
                    code: 500,
                    reason: String::from("InternalError"),
                    message: format!("cannot delete {name}"),
                }
                .into()
            })
            .await;
        let registrar = Registrar::new(store.clone(), &RestMapper::builtin())
            .expect("registrar")
            .with_poll(Duration::from_millis(1), Duration::from_millis(5));

        let err = registrar.register(&descriptor()).await.expect_err("never ready");
        assert!(matches!(err, ApplyKitError::Aggregate(ref errors) if errors.len() == 2));
    }
}
