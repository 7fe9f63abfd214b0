//! Deletion orchestration.
//!
//! Objects with dependents (workloads owning pods) are removed through a
//! kind-specific reaper that scales them down first. Everything else is
//! deleted directly. After a delete, [`wait_for_deletion`] polls until the
//! server no longer returns the object.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{DeleteOptions, ObjectStore, PropagationPolicy};
use crate::error::{ApplyKitError, DeletionError, Result};
use crate::object::{GroupKind, LiveObjectHandle};
use crate::patch::{PatchEnvelope, PatchType};
use crate::wait::{checkpoint, pause};

/// A kind-specific graceful removal procedure.
#[async_trait]
pub trait Reaper: Send + Sync {
    /// Removes the object, waiting at most `grace_period` for it to wind down.
    async fn stop(&self, store: &dyn ObjectStore, handle: &LiveObjectHandle, grace_period: Duration) -> Result<()>;
}

/// Finds the reaper of a kind.
#[cfg_attr(test, mockall::automock)]
pub trait ReaperLookup: Send + Sync {
    /// Returns the reaper for `group_kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DeletionError::NoSuchReaper`] if the kind has none.
    fn reaper_for(&self, group_kind: &GroupKind) -> Result<Arc<dyn Reaper>>;
}

/// Reapers keyed by kind.
#[derive(Default, Clone)]
pub struct ReaperRegistry {
    reapers: HashMap<GroupKind, Arc<dyn Reaper>>,
}

impl std::fmt::Debug for ReaperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaperRegistry")
            .field("kinds", &self.reapers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ReaperRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry scaling down the built-in replicated workloads.
    #[must_use]
    pub fn builtin() -> Self {
        let scale: Arc<dyn Reaper> = Arc::new(ScaleReaper::default());
        let mut registry = Self::new();
        for kind in ["Deployment", "ReplicaSet", "StatefulSet"] {
            registry.register(GroupKind::new("apps", kind), Arc::clone(&scale));
        }
        registry.register(GroupKind::new("", "ReplicationController"), scale);
        registry
    }

    /// Adds or replaces the reaper of a kind.
    pub fn register(&mut self, group_kind: GroupKind, reaper: Arc<dyn Reaper>) {
        self.reapers.insert(group_kind, reaper);
    }
}

impl ReaperLookup for ReaperRegistry {
    fn reaper_for(&self, group_kind: &GroupKind) -> Result<Arc<dyn Reaper>> {
        self.reapers.get(group_kind).cloned().ok_or_else(|| {
            DeletionError::NoSuchReaper {
                group_kind: group_kind.to_string(),
            }
            .into()
        })
    }
}

/// Scales a replicated workload to zero, waits for its replicas to go away,
/// then deletes it with foreground propagation.
#[derive(Debug, Clone)]
pub struct ScaleReaper {
    poll_interval: Duration,
}

impl Default for ScaleReaper {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ScaleReaper {
    /// Creates a reaper polling the replica count every `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl Reaper for ScaleReaper {
    async fn stop(&self, store: &dyn ObjectStore, handle: &LiveObjectHandle, grace_period: Duration) -> Result<()> {
        let scale_down = PatchEnvelope::new(PatchType::JsonMerge, br#"{"spec":{"replicas":0}}"#.to_vec());
        match store.patch(handle, &scale_down).await {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        };
        debug!("Scaled {} to zero", handle.describe());

        let deadline = Instant::now() + grace_period;
        loop {
            let live = match store.get(handle).await {
                Err(e) if e.is_not_found() => return Ok(()),
                other => other?,
            };
            let replicas = live
                .pointer("status.replicas")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default();
            if replicas == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(DeletionError::Timeout {
                    name: handle.name.clone(),
                    waiting_for: String::from("scaled to zero"),
                }
                .into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let grace = i64::try_from(grace_period.as_secs()).unwrap_or(i64::MAX);
        let options = DeleteOptions::default()
            .with_grace_period(grace)
            .with_propagation(PropagationPolicy::Foreground);
        match store.delete(handle, &options).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Deletes objects, preferring a kind's reaper.
pub struct Deleter<'a> {
    store: &'a dyn ObjectStore,
    reapers: &'a dyn ReaperLookup,
    grace_period: Duration,
    token: &'a CancellationToken,
}

impl<'a> Deleter<'a> {
    /// Creates a deleter.
    #[must_use]
    pub fn new(
        store: &'a dyn ObjectStore,
        reapers: &'a dyn ReaperLookup,
        grace_period: Duration,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            reapers,
            grace_period,
            token,
        }
    }

    /// Deletes the object behind `handle`.
    ///
    /// Kinds without a reaper are deleted directly; any other lookup failure
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns the lookup, reaper or delete error.
    pub async fn delete(&self, handle: &LiveObjectHandle) -> Result<()> {
        checkpoint(self.token, "delete")?;
        let group_kind = handle.mapping.gvk.group_kind();

        match self.reapers.reaper_for(&group_kind) {
            Ok(reaper) => {
                info!("Reaping {} (grace period {:?})", handle.describe(), self.grace_period);
                tokio::select! {
                    () = self.token.cancelled() => Err(ApplyKitError::cancelled("reap")),
                    result = reaper.stop(self.store, handle, self.grace_period) => result,
                }
            }
            Err(e) if e.is_no_such_reaper() => {
                info!("Deleting {}", handle.describe());
                self.store.delete(handle, &DeleteOptions::default()).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Polls until the server reports the object gone.
///
/// The first check happens immediately. `timeout` of `None` polls until the
/// object is gone or `token` is cancelled.
///
/// # Errors
///
/// Returns any fetch error other than not-found, a timeout or a
/// cancellation.
pub async fn wait_for_deletion(
    store: &dyn ObjectStore,
    handle: &LiveObjectHandle,
    interval: Duration,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        checkpoint(token, "wait for deletion")?;
        match store.get(handle).await {
            Err(e) if e.is_not_found() => {
                debug!("{} is gone", handle.describe());
                return Ok(());
            }
            Err(e) => return Err(e),
            Ok(_) => debug!("{} still present", handle.describe()),
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(DeletionError::Timeout {
                name: handle.name.clone(),
                waiting_for: String::from("deleted"),
            }
            .into());
        }
        pause(interval, token, "wait for deletion").await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryStore, Verb};
    use crate::object::{GroupVersionKind, Object};
    use crate::resource::{RestMapping, Scope};
    use serde_json::json;

    fn mapping(group: &str, kind: &str, resource: &str) -> RestMapping {
        RestMapping::new(GroupVersionKind::new(group, "v1", kind), resource, Scope::Namespaced)
    }

    async fn seed(store: &MemoryStore, mapping: &RestMapping, body: serde_json::Value) -> LiveObjectHandle {
        let object = Object::from_value(body).expect("object");
        let created = store.create(mapping, Some("default"), &object).await.expect("create");
        LiveObjectHandle::new(
            mapping.clone(),
            Some(String::from("default")),
            created.name().expect("name"),
        )
    }

    fn registry() -> ReaperRegistry {
        let mut registry = ReaperRegistry::new();
        registry.register(
            GroupKind::new("apps", "Deployment"),
            Arc::new(ScaleReaper::new(Duration::from_millis(1))),
        );
        registry
    }

    #[tokio::test]
    async fn test_kind_without_reaper_is_deleted_directly_once() {
        let store = MemoryStore::default();
        let handle = seed(&store, &mapping("", "ConfigMap", "configmaps"), json!({"metadata": {"name": "cm"}})).await;
        let reapers = registry();
        let token = CancellationToken::new();

        Deleter::new(&store, &reapers, Duration::from_secs(120), &token)
            .delete(&handle)
            .await
            .expect("delete");

        assert_eq!(store.calls(Verb::Delete).await, 1);
        assert_eq!(store.calls(Verb::Get).await, 0);
        assert_eq!(store.calls(Verb::Patch).await, 0);
    }

    #[tokio::test]
    async fn test_scale_reaper_scales_then_deletes() {
        let store = MemoryStore::default();
        let deployments = mapping("apps", "Deployment", "deployments");
        let handle = seed(
            &store,
            &deployments,
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}, "spec": {"replicas": 3}}),
        )
        .await;
        let reapers = registry();
        let token = CancellationToken::new();

        Deleter::new(&store, &reapers, Duration::from_secs(5), &token)
            .delete(&handle)
            .await
            .expect("reap");

        assert_eq!(store.calls(Verb::Patch).await, 1);
        assert_eq!(store.calls(Verb::Delete).await, 1);
        assert!(store.stored(&deployments, Some("default"), "web").await.is_none());
    }

    #[tokio::test]
    async fn test_scale_reaper_times_out() {
        let store = MemoryStore::default();
        let deployments = mapping("apps", "Deployment", "deployments");
        let handle = seed(
            &store,
            &deployments,
            json!({"metadata": {"name": "stuck"}, "spec": {"replicas": 2}, "status": {"replicas": 2}}),
        )
        .await;

        let err = ScaleReaper::new(Duration::from_millis(1))
            .stop(&store, &handle, Duration::from_millis(5))
            .await
            .expect_err("replicas never drain");
        assert!(matches!(err, ApplyKitError::Deletion(DeletionError::Timeout { .. })));
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_lookup_errors_propagate() {
        let store = MemoryStore::default();
        let handle = seed(&store, &mapping("", "ConfigMap", "configmaps"), json!({"metadata": {"name": "cm"}})).await;

        let mut reapers = MockReaperLookup::new();
        reapers
            .expect_reaper_for()
            .times(1)
            .returning(|_| Err(ApplyKitError::internal("registry unavailable")));
        let token = CancellationToken::new();

        let err = Deleter::new(&store, &reapers, Duration::from_secs(1), &token)
            .delete(&handle)
            .await
            .expect_err("lookup failure");
        assert!(matches!(err, ApplyKitError::Internal(_)));
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_wait_for_deletion() {
        let store = MemoryStore::default().with_deletion_delay(2);
        let configmaps = mapping("", "ConfigMap", "configmaps");
        let handle = seed(&store, &configmaps, json!({"metadata": {"name": "cm"}})).await;
        store.delete(&handle, &DeleteOptions::default()).await.expect("delete");
        let token = CancellationToken::new();

        wait_for_deletion(&store, &handle, Duration::from_millis(1), None, &token)
            .await
            .expect("eventually gone");
        assert_eq!(store.calls(Verb::Get).await, 3);
    }

    #[tokio::test]
    async fn test_wait_for_deletion_timeout_and_cancel() {
        let store = MemoryStore::default();
        let configmaps = mapping("", "ConfigMap", "configmaps");
        let handle = seed(&store, &configmaps, json!({"metadata": {"name": "cm"}})).await;
        let token = CancellationToken::new();

        let err = wait_for_deletion(&store, &handle, Duration::from_millis(1), Some(Duration::ZERO), &token)
            .await
            .expect_err("never deleted");
        assert!(matches!(err, ApplyKitError::Deletion(DeletionError::Timeout { .. })));

        token.cancel();
        let err = wait_for_deletion(&store, &handle, Duration::from_millis(1), None, &token)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, ApplyKitError::Cancelled { .. }));
    }
}
