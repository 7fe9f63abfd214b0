//! Three-way apply.
//!
//! [`Patcher::apply`] creates an object when it does not exist and patches it
//! otherwise. The patch is computed from three documents: the configuration
//! last applied (stored as a marker on the live object), the desired
//! configuration and the live object. Fields the caller removed are retracted
//! while fields set by other actors are kept.
//!
//! Version conflicts are retried with a linear backoff, re-fetching the live
//! object before every attempt. When conflicts persist and `force` is set, or
//! when the patch fails and `delete_first` is set, the object is deleted and
//! recreated from the desired configuration.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ObjectStore;
use crate::config::{ApplyConfig, ApplyOption, PatcherSettings};
use crate::deletion::{Deleter, ReaperLookup, ReaperRegistry, wait_for_deletion};
use crate::error::{ApplyKitError, InputError, PermissionError, Result};
use crate::object::{GroupVersionKind, LiveObjectHandle, Object};
use crate::patch::{PatchStrategy, SchemaSource};
use crate::resource::{ResourceDescriptor, RestMapper, TypeCatalog};
use crate::result::{LocateStrategy, Located, locate};
use crate::tracker::ConfigurationTracker;
use crate::wait::{checkpoint, pause};

/// What an apply did to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    /// The object did not exist and was created.
    Created,
    /// A patch was sent.
    Patched,
    /// The computed patch was a no-op; nothing was sent.
    Unchanged,
    /// The object was deleted and created again.
    Recreated,
}

impl std::fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Patched => "patched",
            Self::Unchanged => "unchanged",
            Self::Recreated => "recreated",
        };
        f.write_str(name)
    }
}

/// Result of applying one located object.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Address of the object, refreshed from the server.
    pub handle: LiveObjectHandle,
    /// What happened.
    pub action: ApplyAction,
    /// Patch sent, or the full configuration for creates and recreates.
    pub patch: Vec<u8>,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// One entry per located object, in order.
    pub applied: Vec<Applied>,
}

impl ApplyOutcome {
    /// Bytes of the last applied object, empty if nothing was located.
    #[must_use]
    pub fn patch(&self) -> &[u8] {
        self.applied.last().map_or(&[], |a| a.patch.as_slice())
    }
}

/// A failed apply together with the payload computed before it failed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ApplyFailure {
    /// The error.
    #[source]
    pub error: ApplyKitError,
    /// Most recently computed patch or configuration, possibly empty.
    pub patch: Vec<u8>,
}

impl ApplyFailure {
    /// Pairs an error with a payload.
    #[must_use]
    pub const fn new(error: ApplyKitError, patch: Vec<u8>) -> Self {
        Self { error, patch }
    }

    /// Returns the error, dropping the payload.
    #[must_use]
    pub fn into_error(self) -> ApplyKitError {
        self.error
    }
}

impl From<ApplyKitError> for ApplyFailure {
    fn from(error: ApplyKitError) -> Self {
        Self::new(error, Vec::new())
    }
}

/// Outcome of one step of the apply state machine.
struct Step {
    patch: Vec<u8>,
    action: ApplyAction,
}

type StepResult = std::result::Result<Step, ApplyFailure>;

/// Applies desired objects to a versioned object store.
pub struct Patcher {
    store: Arc<dyn ObjectStore>,
    mapper: RestMapper,
    catalog: TypeCatalog,
    schema: Option<Arc<dyn SchemaSource>>,
    reapers: Arc<dyn ReaperLookup>,
    settings: PatcherSettings,
    defaults: ApplyConfig,
    locate_strategy: LocateStrategy,
    token: CancellationToken,
}

impl std::fmt::Debug for Patcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patcher")
            .field("backend", &self.store.backend_type())
            .field("defaults", &self.defaults)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Patcher {
    /// Creates a patcher whose marker is tracked under `name`.
    ///
    /// Uses the built-in mappings, type catalog and reapers.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        let defaults = ApplyConfig {
            tracker_name: name.into(),
            ..ApplyConfig::default()
        };
        Self {
            store,
            mapper: RestMapper::builtin(),
            catalog: TypeCatalog::builtin(),
            schema: None,
            reapers: Arc::new(ReaperRegistry::builtin()),
            settings: PatcherSettings::default(),
            defaults,
            locate_strategy: LocateStrategy::default(),
            token: CancellationToken::new(),
        }
    }

    /// Sets the REST mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: RestMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Sets the structural type catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: TypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Registers a custom resource kind with the mapper and the catalog.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: &ResourceDescriptor) -> Self {
        self.mapper.register_descriptor(descriptor);
        self.catalog.register_descriptor(descriptor);
        self
    }

    /// Consults `schema` for field-merge metadata before the catalog.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn SchemaSource>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the reapers used when deleting.
    #[must_use]
    pub fn with_reapers(mut self, reapers: Arc<dyn ReaperLookup>) -> Self {
        self.reapers = reapers;
        self
    }

    /// Sets timing and naming knobs.
    #[must_use]
    pub fn with_settings(mut self, settings: PatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Applies `options` to the defaults of every call.
    #[must_use]
    pub fn with_options(mut self, options: &[ApplyOption]) -> Self {
        self.defaults = ApplyConfig::from_base(&self.defaults, options);
        self
    }

    /// Replaces the defaults of every call.
    #[must_use]
    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Sets how desired objects are located.
    #[must_use]
    pub const fn with_locate_strategy(mut self, strategy: LocateStrategy) -> Self {
        self.locate_strategy = strategy;
        self
    }

    /// Cancels in-flight calls when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Returns the defaults of every call.
    #[must_use]
    pub const fn defaults(&self) -> &ApplyConfig {
        &self.defaults
    }

    /// Creates or patches `desired` on the server.
    ///
    /// `options` override the defaults for this call only.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyFailure`] carrying the error and the payload that
    /// was computed before it occurred. A `null` object fails with
    /// `NoObjectGiven` before any request is made.
    pub async fn apply<T: Serialize + ?Sized>(
        &self,
        desired: &T,
        options: &[ApplyOption],
    ) -> std::result::Result<ApplyOutcome, ApplyFailure> {
        let config = ApplyConfig::from_base(&self.defaults, options);
        let desired = Object::from_serializable(desired)?;
        let located = locate(
            &config,
            &self.mapper,
            &self.settings.default_namespace,
            &desired,
            self.locate_strategy,
        )?;

        let applied = located
            .visit(|located| self.apply_located(&config, located))
            .await?;
        Ok(ApplyOutcome { applied })
    }

    /// Deletes `desired` from the server, preferring the kind's reaper.
    ///
    /// Does not wait for the object to disappear.
    ///
    /// # Errors
    ///
    /// Returns the first locate, reaper or delete error.
    pub async fn delete<T: Serialize + ?Sized>(&self, desired: &T, options: &[ApplyOption]) -> Result<()> {
        let config = ApplyConfig::from_base(&self.defaults, options);
        let desired = Object::from_serializable(desired)?;
        let located = locate(
            &config,
            &self.mapper,
            &self.settings.default_namespace,
            &desired,
            self.locate_strategy,
        )?;

        let deleter = self.deleter();
        let deleter = &deleter;
        located
            .visit(move |located| async move { deleter.delete(&located.handle).await })
            .await?;
        Ok(())
    }

    /// Fetches an object and decodes it into `T`.
    ///
    /// `namespace` falls back to the default namespace and is ignored for
    /// cluster-scoped kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is unknown, the fetch fails or the object
    /// does not decode into `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<T> {
        checkpoint(&self.token, "get")?;
        let mapping = self.mapper.mapping_for(gvk)?;
        let namespace = mapping
            .is_namespaced()
            .then(|| namespace.unwrap_or(&self.settings.default_namespace).to_string());
        let handle = LiveObjectHandle::new(mapping, namespace, name);
        self.store.get(&handle).await?.to_typed()
    }

    fn deleter(&self) -> Deleter<'_> {
        Deleter::new(
            self.store.as_ref(),
            self.reapers.as_ref(),
            self.settings.reaper_grace_period(),
            &self.token,
        )
    }

    async fn apply_located(
        &self,
        config: &ApplyConfig,
        located: Located,
    ) -> std::result::Result<Applied, ApplyFailure> {
        let Located { mut handle, object } = located;
        let tracker = ConfigurationTracker::new(&self.settings.annotation_prefix, &config.tracker_name);

        let modified = tracker.modified_configuration(&object, true)?;
        let fail = |error: ApplyKitError| ApplyFailure::new(error, modified.clone());

        checkpoint(&self.token, "apply").map_err(fail)?;

        // Without a name there is nothing to fetch; the server picks one.
        if handle.name.is_empty() {
            if object.generate_name().is_none_or(str::is_empty) {
                return Err(fail(
                    InputError::MissingField {
                        field: String::from("metadata.name"),
                    }
                    .into(),
                ));
            }
            return self.create_new(config, &tracker, handle, object, modified).await;
        }

        let current = match self.store.get(&handle).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                return self.create_new(config, &tracker, handle, object, modified).await;
            }
            Err(e) => return Err(fail(e)),
        };

        if !config.allow_update {
            return Err(fail(PermissionError::UpdateNotAllowed.into()));
        }
        handle.refresh(&current);

        let step = self
            .patch_with_retries(config, &tracker, &mut handle, current, &modified)
            .await?;
        Ok(Applied {
            handle,
            action: step.action,
            patch: step.patch,
        })
    }

    async fn create_new(
        &self,
        config: &ApplyConfig,
        tracker: &ConfigurationTracker,
        mut handle: LiveObjectHandle,
        mut object: Object,
        modified: Vec<u8>,
    ) -> std::result::Result<Applied, ApplyFailure> {
        let fail = |error: ApplyKitError| ApplyFailure::new(error, modified.clone());
        if !config.allow_create {
            return Err(fail(PermissionError::CreateNotAllowed.into()));
        }
        tracker.create_apply_annotation(&mut object).map_err(fail)?;
        self.create(&mut handle, &object).await.map_err(fail)?;
        Ok(Applied {
            handle,
            action: ApplyAction::Created,
            patch: modified,
        })
    }

    async fn create(&self, handle: &mut LiveObjectHandle, object: &Object) -> Result<()> {
        let created = self
            .store
            .create(&handle.mapping, handle.namespace(), object)
            .await?;
        handle.refresh(&created);

        if created.uid().is_none_or(str::is_empty) {
            return Err(ApplyKitError::internal(format!(
                "server assigned no uid to {}",
                handle.describe()
            )));
        }
        info!("Created {}", handle.describe());
        Ok(())
    }

    async fn patch_with_retries(
        &self,
        config: &ApplyConfig,
        tracker: &ConfigurationTracker,
        handle: &mut LiveObjectHandle,
        current: Object,
        modified: &[u8],
    ) -> StepResult {
        let strategy = PatchStrategy::resolve(&self.catalog, self.schema.as_deref(), &handle.mapping.gvk);
        let mut result = self.patch_once(&strategy, tracker, handle, &current, modified).await;

        for attempt in 1..=config.retries {
            let last_patch = match &result {
                Err(failure) if failure.error.is_retryable() => failure.patch.clone(),
                _ => break,
            };
            let wait = self.settings.backoff_interval() * attempt;
            debug!(
                "Conflict patching {}, retry {}/{} in {:?}",
                handle.describe(),
                attempt,
                config.retries,
                wait
            );
            pause(wait, &self.token, "apply backoff")
                .await
                .map_err(|e| ApplyFailure::new(e, last_patch.clone()))?;

            // The object may have changed while waiting.
            let current = self
                .store
                .get(handle)
                .await
                .map_err(|e| ApplyFailure::new(e, last_patch))?;
            handle.refresh(&current);
            result = self.patch_once(&strategy, tracker, handle, &current, modified).await;
        }

        let result = match result {
            Err(failure) if failure.error.is_conflict() && config.force => {
                warn!(
                    "Conflict on {} persisted after {} retries, recreating",
                    handle.describe(),
                    config.retries
                );
                self.recreate(handle, modified).await
            }
            other => other,
        };

        match result {
            Err(failure) if config.delete_first && self.recreates_on(&failure) => {
                warn!("Patching {} failed ({}), recreating", handle.describe(), failure.error);
                self.recreate(handle, modified).await
            }
            other => other,
        }
    }

    /// Identity changes and cancellations never turn into a recreate, nor do
    /// failures whose patch was a no-op.
    fn recreates_on(&self, failure: &ApplyFailure) -> bool {
        !matches!(
            failure.error,
            ApplyKitError::Precondition(_) | ApplyKitError::Cancelled { .. }
        ) && !self.settings.empty_patches.contains(&failure.patch)
    }

    async fn patch_once(
        &self,
        strategy: &PatchStrategy,
        tracker: &ConfigurationTracker,
        handle: &LiveObjectHandle,
        current: &Object,
        modified: &[u8],
    ) -> StepResult {
        checkpoint(&self.token, "patch")?;
        let original = tracker.original_configuration(current);
        let current = current.to_vec()?;
        let envelope = strategy.compute(original.as_deref(), modified, &current)?;

        if self.settings.empty_patches.contains(&envelope.bytes) {
            debug!("{} is up to date", handle.describe());
            return Ok(Step {
                patch: envelope.bytes,
                action: ApplyAction::Unchanged,
            });
        }

        debug!("Sending {} patch to {}: {}", envelope.patch_type, handle.describe(), envelope.as_str());
        match self.store.patch(handle, &envelope).await {
            Ok(_) => {
                info!("Patched {}", handle.describe());
                Ok(Step {
                    patch: envelope.bytes,
                    action: ApplyAction::Patched,
                })
            }
            Err(e) => Err(ApplyFailure::new(e, envelope.bytes)),
        }
    }

    /// Deletes the object, waits until it is gone and creates it from
    /// `modified`.
    async fn recreate(&self, handle: &mut LiveObjectHandle, modified: &[u8]) -> StepResult {
        let fail = |error: ApplyKitError| ApplyFailure::new(error, modified.to_vec());

        match self.deleter().delete(handle).await {
            Err(e) if e.is_not_found() => debug!("{} already gone", handle.describe()),
            other => other.map_err(fail)?,
        }
        wait_for_deletion(
            self.store.as_ref(),
            handle,
            self.settings.delete_poll_interval(),
            self.settings.delete_timeout(),
            &self.token,
        )
        .await
        .map_err(fail)?;

        let mut object = Object::from_slice(modified).map_err(fail)?;
        object.set_resource_version(None);
        checkpoint(&self.token, "recreate").map_err(fail)?;
        self.create(handle, &object).await.map_err(fail)?;
        info!("Recreated {}", handle.describe());

        Ok(Step {
            patch: modified.to_vec(),
            action: ApplyAction::Recreated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryStore, Verb};
    use crate::error::ApiError;
    use crate::patch::MockSchemaSource;
    use crate::resource::RestMapping;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const MARKER: &str = "applykit-test/last-applied-configuration";

    fn settings() -> PatcherSettings {
        PatcherSettings::default()
            .with_backoff_interval(Duration::from_millis(1))
            .with_delete_poll_interval(Duration::from_millis(1))
    }

    fn setup() -> (Arc<MemoryStore>, Patcher) {
        let store = Arc::new(MemoryStore::default());
        let patcher = Patcher::new("test", store.clone()).with_settings(settings());
        (store, patcher)
    }

    fn config_map(data: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings"},
            "data": data
        })
    }

    fn config_maps() -> RestMapping {
        RestMapper::builtin()
            .mapping_for(&GroupVersionKind::new("", "v1", "ConfigMap"))
            .expect("mapping")
    }

    async fn stored(store: &MemoryStore) -> Object {
        store
            .stored(&config_maps(), Some("default"), "settings")
            .await
            .expect("stored")
    }

    fn conflict(name: &str) -> ApplyKitError {
        ApiError::conflict(name, "the object has been modified").into()
    }

    async fn total_calls(store: &MemoryStore) -> usize {
        let mut total = 0;
        for verb in [Verb::Get, Verb::Create, Verb::Replace, Verb::Patch, Verb::Delete, Verb::List] {
            total += store.calls(verb).await;
        }
        total
    }

    #[tokio::test]
    async fn test_null_object_makes_no_calls() {
        let (store, patcher) = setup();
        let failure = patcher
            .apply(&Option::<serde_json::Value>::None, &[])
            .await
            .expect_err("no object");
        assert!(failure.error.is_no_object_given());
        assert!(failure.patch.is_empty());

        let err = patcher
            .delete(&serde_json::Value::Null, &[])
            .await
            .expect_err("no object");
        assert!(err.is_no_object_given());
        assert_eq!(total_calls(&store).await, 0);
    }

    #[tokio::test]
    async fn test_create_writes_marker() {
        let (store, patcher) = setup();
        let outcome = patcher
            .apply(&config_map(json!({"a": "1"})), &[])
            .await
            .expect("apply");

        let applied = &outcome.applied[0];
        assert_eq!(applied.action, ApplyAction::Created);
        assert!(applied.handle.version_token.is_some());
        assert_eq!(store.calls(Verb::Get).await, 1);
        assert_eq!(store.calls(Verb::Create).await, 1);

        let live = stored(&store).await;
        let marker: serde_json::Value =
            serde_json::from_str(live.annotation(MARKER).expect("marker")).expect("marker json");
        assert_eq!(marker["data"], json!({"a": "1"}));
        assert_eq!(marker["metadata"]["namespace"], json!("default"));
        assert!(marker["metadata"].get("annotations").is_none());

        let sent: serde_json::Value = serde_json::from_slice(outcome.patch()).expect("modified");
        assert_eq!(sent["metadata"]["annotations"][MARKER], json!(live.annotation(MARKER)));
    }

    #[tokio::test]
    async fn test_create_not_allowed() {
        let (store, patcher) = setup();
        let failure = patcher
            .apply(&config_map(json!({})), &[ApplyOption::DisableCreate])
            .await
            .expect_err("create disabled");
        assert!(failure.error.is_create_not_allowed());
        assert_eq!(store.calls(Verb::Create).await, 0);
        assert!(store.stored(&config_maps(), Some("default"), "settings").await.is_none());
    }

    #[tokio::test]
    async fn test_update_not_allowed() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");

        let failure = patcher
            .apply(&config_map(json!({"a": "2"})), &[ApplyOption::DisableUpdate])
            .await
            .expect_err("update disabled");
        assert!(failure.error.is_update_not_allowed());
        assert_eq!(store.calls(Verb::Patch).await, 0);
    }

    #[tokio::test]
    async fn test_unchanged_apply_sends_nothing() {
        let (store, patcher) = setup();
        let desired = config_map(json!({"a": "1"}));
        patcher.apply(&desired, &[]).await.expect("create");

        let outcome = patcher.apply(&desired, &[]).await.expect("reapply");
        assert_eq!(outcome.applied[0].action, ApplyAction::Unchanged);
        assert_eq!(outcome.patch(), b"{}");
        assert_eq!(store.calls(Verb::Patch).await, 0);
    }

    #[tokio::test]
    async fn test_three_way_patch_keeps_foreign_fields() {
        let (store, patcher) = setup();
        patcher
            .apply(&config_map(json!({"a": "1", "b": "2"})), &[])
            .await
            .expect("create");
        store
            .modify(&config_maps(), Some("default"), "settings", |o| {
                o.set_annotation("owner", "someone-else");
            })
            .await
            .expect("modify");

        let outcome = patcher
            .apply(&config_map(json!({"a": "1", "c": "3"})), &[])
            .await
            .expect("patch");
        assert_eq!(outcome.applied[0].action, ApplyAction::Patched);
        assert_eq!(store.calls(Verb::Patch).await, 1);

        let live = stored(&store).await;
        assert_eq!(live.pointer("data"), Some(&json!({"a": "1", "c": "3"})));
        assert_eq!(live.annotation("owner"), Some("someone-else"));

        let marker: serde_json::Value =
            serde_json::from_str(live.annotation(MARKER).expect("marker")).expect("marker json");
        assert_eq!(marker["data"], json!({"a": "1", "c": "3"}));
    }

    #[tokio::test]
    async fn test_conflicts_without_force_fail_after_retries() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        let gets_before = store.calls(Verb::Get).await;

        let failure = patcher
            .apply(&config_map(json!({"a": "2"})), &[ApplyOption::Retries(3)])
            .await
            .expect_err("conflict");

        assert!(failure.error.is_conflict());
        assert!(!failure.patch.is_empty());
        assert_eq!(store.calls(Verb::Patch).await, 4);
        assert_eq!(store.calls(Verb::Get).await - gets_before, 1 + 3);
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_conflicts_with_force_recreate_once() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        let gets_before = store.calls(Verb::Get).await;

        let outcome = patcher
            .apply(
                &config_map(json!({"a": "2"})),
                &[ApplyOption::Retries(2), ApplyOption::Force],
            )
            .await
            .expect("recreated");

        assert_eq!(outcome.applied[0].action, ApplyAction::Recreated);
        assert_eq!(store.calls(Verb::Patch).await, 3);
        // Initial fetch, two re-fetches, one poll.
        assert_eq!(store.calls(Verb::Get).await - gets_before, 4);
        assert_eq!(store.calls(Verb::Delete).await, 1);
        assert_eq!(store.calls(Verb::Create).await, 2);

        let live = stored(&store).await;
        assert_eq!(live.pointer("data"), Some(&json!({"a": "2"})));
        assert!(live.annotation(MARKER).is_some());
    }

    #[tokio::test]
    async fn test_delete_first_recreates_after_exhausted_retries() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;

        let outcome = patcher
            .apply(
                &config_map(json!({"a": "2"})),
                &[ApplyOption::Retries(2), ApplyOption::DeleteFirst],
            )
            .await
            .expect("recreated");

        assert_eq!(outcome.applied[0].action, ApplyAction::Recreated);
        assert_eq!(store.calls(Verb::Patch).await, 2 + 1);
        assert_eq!(store.calls(Verb::Delete).await, 1);
        assert_eq!(store.calls(Verb::Create).await, 2);
        assert_eq!(stored(&store).await.pointer("data"), Some(&json!({"a": "2"})));
    }

    #[tokio::test]
    async fn test_delete_first_retries_failed_forced_recreate() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        store
            .fail_times(Verb::Create, 1, |name| {
                ApplyKitError::internal(format!("create of {name} interrupted"))
            })
            .await;

        let outcome = patcher
            .apply(
                &config_map(json!({"a": "2"})),
                &[ApplyOption::Retries(0), ApplyOption::Force, ApplyOption::DeleteFirst],
            )
            .await
            .expect("recreated");

        assert_eq!(outcome.applied[0].action, ApplyAction::Recreated);
        assert_eq!(store.calls(Verb::Patch).await, 1);
        // The second delete finds the object already gone.
        assert_eq!(store.calls(Verb::Delete).await, 2);
        // Initial create, the interrupted one and the successful one.
        assert_eq!(store.calls(Verb::Create).await, 3);
        assert_eq!(stored(&store).await.pointer("data"), Some(&json!({"a": "2"})));
    }

    #[tokio::test]
    async fn test_failed_forced_recreate_without_delete_first_fails() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        store
            .fail_times(Verb::Create, 1, |_| ApplyKitError::internal("interrupted"))
            .await;

        let failure = patcher
            .apply(
                &config_map(json!({"a": "2"})),
                &[ApplyOption::Retries(0), ApplyOption::Force],
            )
            .await
            .expect_err("recreate failed");

        assert!(matches!(failure.error, ApplyKitError::Internal(ref m) if m == "interrupted"));
        assert_eq!(store.calls(Verb::Delete).await, 1);
        assert_eq!(store.calls(Verb::Create).await, 2);
        assert!(store.stored(&config_maps(), Some("default"), "settings").await.is_none());
    }

    #[tokio::test]
    async fn test_recreate_waits_until_gone() {
        let store = Arc::new(MemoryStore::default().with_deletion_delay(2));
        let patcher = Patcher::new("test", store.clone()).with_settings(settings());
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        let gets_before = store.calls(Verb::Get).await;

        patcher
            .apply(
                &config_map(json!({"a": "2"})),
                &[ApplyOption::Retries(0), ApplyOption::Force],
            )
            .await
            .expect("recreated");
        // Initial fetch and three polls.
        assert_eq!(store.calls(Verb::Get).await - gets_before, 4);
        assert_eq!(stored(&store).await.pointer("data"), Some(&json!({"a": "2"})));
    }

    #[tokio::test]
    async fn test_conflict_resolves_on_retry() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_times(Verb::Patch, 2, conflict).await;

        let outcome = patcher
            .apply(&config_map(json!({"a": "2"})), &[])
            .await
            .expect("patched");
        assert_eq!(outcome.applied[0].action, ApplyAction::Patched);
        assert_eq!(store.calls(Verb::Patch).await, 3);
        assert_eq!(stored(&store).await.pointer("data"), Some(&json!({"a": "2"})));
    }

    #[tokio::test]
    async fn test_refetch_error_is_returned() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;
        store
            .fail_after(Verb::Get, 1, |_| ApplyKitError::internal("fetch failed"))
            .await;

        let failure = patcher
            .apply(&config_map(json!({"a": "2"})), &[ApplyOption::Force])
            .await
            .expect_err("fetch error");
        assert!(matches!(failure.error, ApplyKitError::Internal(ref m) if m == "fetch failed"));
        assert_eq!(store.calls(Verb::Patch).await, 1);
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_delete_first_recreates_on_rejected_patch() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store
            .fail_times(Verb::Patch, 1, |name| {
                ApiError::Invalid {
                    name: name.to_string(),
                    message: String::from("field is immutable"),
                }
                .into()
            })
            .await;

        let outcome = patcher
            .apply(&config_map(json!({"a": "2"})), &[ApplyOption::DeleteFirst])
            .await
            .expect("recreated");
        assert_eq!(outcome.applied[0].action, ApplyAction::Recreated);
        assert_eq!(store.calls(Verb::Patch).await, 1);
        assert_eq!(store.calls(Verb::Delete).await, 1);
    }

    #[tokio::test]
    async fn test_rejected_patch_without_delete_first_fails() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store
            .fail_times(Verb::Patch, 1, |_| ApplyKitError::internal("rejected"))
            .await;

        let failure = patcher
            .apply(&config_map(json!({"a": "2"})), &[])
            .await
            .expect_err("rejected");
        let patch: serde_json::Value = serde_json::from_slice(&failure.patch).expect("patch json");
        assert_eq!(patch["data"], json!({"a": "2"}));
        assert_eq!(store.calls(Verb::Patch).await, 1);
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    fn widgets() -> ResourceDescriptor {
        ResourceDescriptor::new("example.com", "v1", "Widget")
    }

    fn widget_mapping() -> RestMapping {
        let mut mapper = RestMapper::builtin();
        mapper.register_descriptor(&widgets());
        mapper
            .mapping_for(&widgets().group_version_kind())
            .expect("mapping")
    }

    fn widget(size: u32) -> serde_json::Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w"},
            "spec": {"size": size}
        })
    }

    #[tokio::test]
    async fn test_custom_kind_uses_merge_patch() {
        let store = Arc::new(MemoryStore::default());
        let patcher = Patcher::new("test", store.clone())
            .with_settings(settings())
            .with_descriptor(&widgets());

        patcher.apply(&widget(1), &[]).await.expect("create");
        let outcome = patcher.apply(&widget(2), &[]).await.expect("patch");
        let patch: serde_json::Value = serde_json::from_slice(outcome.patch()).expect("patch json");
        assert_eq!(patch["spec"], json!({"size": 2}));
        assert!(patch["metadata"]["annotations"].get(MARKER).is_some());

        let mapping = widget_mapping();
        let live = store.stored(&mapping, Some("default"), "w").await.expect("stored");
        assert_eq!(live.pointer("spec.size"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_identity_change_is_never_recreated() {
        let store = Arc::new(MemoryStore::default());
        let patcher = Patcher::new("test", store.clone())
            .with_settings(settings())
            .with_descriptor(&widgets());
        patcher.apply(&widget(1), &[]).await.expect("create");

        let mapping = widget_mapping();
        store
            .modify(&mapping, Some("default"), "w", |o| {
                o.as_map_mut()
                    .insert(String::from("apiVersion"), json!("example.com/v2"));
            })
            .await
            .expect("modify");

        let failure = patcher
            .apply(&widget(2), &[ApplyOption::DeleteFirst, ApplyOption::Force])
            .await
            .expect_err("precondition");
        assert!(matches!(failure.error, ApplyKitError::Precondition(_)));
        assert_eq!(store.calls(Verb::Patch).await, 0);
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_schema_metadata_is_preferred() {
        let mut schema = MockSchemaSource::new();
        schema
            .expect_lookup()
            .times(1)
            .returning(|_| Ok(Some(crate::patch::object_meta())));

        let store = Arc::new(MemoryStore::default());
        let patcher = Patcher::new("test", store.clone())
            .with_settings(settings())
            .with_schema(Arc::new(schema));
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        patcher
            .apply(&config_map(json!({"a": "2"})), &[])
            .await
            .expect("patch");
        assert_eq!(store.calls(Verb::Patch).await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_apply_makes_no_calls() {
        let (store, patcher) = setup();
        let token = CancellationToken::new();
        let patcher = patcher.with_cancellation(token.clone());
        token.cancel();

        let failure = patcher
            .apply(&config_map(json!({"a": "1"})), &[])
            .await
            .expect_err("cancelled");
        assert!(matches!(failure.error, ApplyKitError::Cancelled { .. }));
        assert_eq!(total_calls(&store).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let store = Arc::new(MemoryStore::default());
        let token = CancellationToken::new();
        let patcher = Patcher::new("test", store.clone())
            .with_settings(settings().with_backoff_interval(Duration::from_secs(3600)))
            .with_cancellation(token.clone());
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        store.fail_always(Verb::Patch, conflict).await;

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let failure = patcher
            .apply(&config_map(json!({"a": "2"})), &[ApplyOption::Force])
            .await
            .expect_err("cancelled");
        canceller.await.expect("canceller");

        assert!(matches!(failure.error, ApplyKitError::Cancelled { .. }));
        assert!(!failure.patch.is_empty());
        assert_eq!(store.calls(Verb::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_generated_name_is_refreshed() {
        let (store, patcher) = setup();
        let outcome = patcher
            .apply(
                &json!({
                    "apiVersion": "batch/v1",
                    "kind": "Job",
                    "metadata": {"generateName": "migrate-"},
                    "spec": {"template": {"spec": {"containers": []}}}
                }),
                &[],
            )
            .await
            .expect("create");
        assert!(outcome.applied[0].handle.name.starts_with("migrate-"));
        assert!(outcome.applied[0].handle.name.len() > "migrate-".len());
        assert_eq!(store.calls(Verb::Get).await, 0);
        assert_eq!(store.calls(Verb::Create).await, 1);
    }

    #[tokio::test]
    async fn test_generated_name_respects_create_permission() {
        let (store, patcher) = setup();
        let failure = patcher
            .apply(
                &json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"generateName": "cfg-"}}),
                &[ApplyOption::DisableCreate],
            )
            .await
            .expect_err("create disabled");
        assert!(failure.error.is_create_not_allowed());
        assert_eq!(total_calls(&store).await, 0);
    }

    #[tokio::test]
    async fn test_unnamed_object_is_rejected_without_calls() {
        let (store, patcher) = setup();
        let failure = patcher
            .apply(
                &json!({"apiVersion": "v1", "kind": "ConfigMap", "data": {"a": "1"}}),
                &[ApplyOption::DisableValidation],
            )
            .await
            .expect_err("no name");
        assert!(matches!(
            failure.error,
            ApplyKitError::Input(InputError::MissingField { ref field }) if field == "metadata.name"
        ));
        assert_eq!(total_calls(&store).await, 0);
    }

    #[tokio::test]
    async fn test_list_applies_every_item() {
        let (store, patcher) = setup();
        let list = json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "one"}},
                {"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "two"}}
            ]
        });
        let outcome = patcher.apply(&list, &[]).await.expect("apply");
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(store.calls(Verb::Create).await, 2);
    }

    #[derive(Debug, Deserialize)]
    struct ConfigMapData {
        data: BTreeMap<String, String>,
    }

    #[tokio::test]
    async fn test_get_decodes_typed() {
        let (_store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");

        let typed: ConfigMapData = patcher
            .get(&GroupVersionKind::new("", "v1", "ConfigMap"), None, "settings")
            .await
            .expect("get");
        assert_eq!(typed.data.get("a").map(String::as_str), Some("1"));

        let missing = patcher
            .get::<Object>(&GroupVersionKind::new("", "v1", "ConfigMap"), None, "nope")
            .await
            .expect_err("missing");
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_direct_and_reaped() {
        let (store, patcher) = setup();
        patcher.apply(&config_map(json!({"a": "1"})), &[]).await.expect("create");
        patcher.delete(&config_map(json!({"a": "1"})), &[]).await.expect("delete");
        assert!(store.stored(&config_maps(), Some("default"), "settings").await.is_none());
        assert_eq!(store.calls(Verb::Patch).await, 0);

        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3, "template": {"spec": {"containers": []}}}
        });
        patcher.apply(&deployment, &[]).await.expect("create");
        patcher.delete(&deployment, &[]).await.expect("reap");
        // Scale to zero, then delete.
        assert_eq!(store.calls(Verb::Patch).await, 1);
        assert_eq!(store.calls(Verb::Delete).await, 2);
    }

    #[test]
    fn test_apply_failure_display() {
        let failure = ApplyFailure::from(ApplyKitError::from(InputError::NoObjectGiven));
        assert_eq!(failure.to_string(), "Input error: no object given, can't apply");
        assert!(failure.into_error().is_no_object_given());
    }
}
