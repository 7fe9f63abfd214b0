//! Polling watcher.
//!
//! Lists a kind on every resync, compares the result with a local cache by
//! `resourceVersion` and dispatches add, update and delete events to an
//! [`EventHandler`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ObjectStore;
use crate::error::Result;
use crate::object::Object;
use crate::resource::{ResourceDescriptor, RestMapping};
use crate::wait::pause;

/// Default delay between resyncs.
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(5);

/// Receives watch events. Every method defaults to doing nothing.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// An object appeared.
    async fn on_add(&self, _object: &Object) {}

    /// An object changed.
    async fn on_update(&self, _old: &Object, _new: &Object) {}

    /// An object disappeared.
    async fn on_delete(&self, _object: &Object) {}
}

/// Counts of events dispatched by one resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncStats {
    /// Objects added.
    pub added: usize,
    /// Objects updated.
    pub updated: usize,
    /// Objects deleted.
    pub deleted: usize,
}

type CacheKey = (Option<String>, String);

/// Watches one kind in one namespace, or in all of them.
pub struct Watcher {
    store: Arc<dyn ObjectStore>,
    mapping: RestMapping,
    namespace: Option<String>,
    handler: Arc<dyn EventHandler>,
    resync_period: Duration,
    cache: BTreeMap<CacheKey, Object>,
}

impl Watcher {
    /// Creates a watcher. A `namespace` of `None` watches every namespace.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        mapping: RestMapping,
        namespace: Option<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            store,
            mapping,
            namespace,
            handler,
            resync_period: DEFAULT_RESYNC_PERIOD,
            cache: BTreeMap::new(),
        }
    }

    /// Creates a watcher for a custom resource kind.
    #[must_use]
    pub fn for_descriptor(
        store: Arc<dyn ObjectStore>,
        descriptor: &ResourceDescriptor,
        namespace: Option<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let mapping = RestMapping::new(
            descriptor.group_version_kind(),
            descriptor.get_plural(),
            descriptor.scope,
        );
        Self::new(store, mapping, namespace, handler)
    }

    /// Sets the delay between resyncs.
    #[must_use]
    pub const fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Lists once and dispatches the differences to the cache.
    ///
    /// # Errors
    ///
    /// Returns the list error; the cache is left untouched.
    pub async fn resync(&mut self) -> Result<ResyncStats> {
        let list = self
            .store
            .list(&self.mapping, self.namespace.as_deref())
            .await?;

        let mut stats = ResyncStats::default();
        let mut seen = BTreeMap::new();
        for object in list.items {
            let key = (
                object.namespace().map(String::from),
                object.name().unwrap_or_default().to_string(),
            );
            match self.cache.remove(&key) {
                None => {
                    self.handler.on_add(&object).await;
                    stats.added += 1;
                }
                Some(old) if old.resource_version() != object.resource_version() => {
                    self.handler.on_update(&old, &object).await;
                    stats.updated += 1;
                }
                Some(_) => {}
            }
            seen.insert(key, object);
        }

        for object in std::mem::replace(&mut self.cache, seen).into_values() {
            self.handler.on_delete(&object).await;
            stats.deleted += 1;
        }

        debug!(
            "Resynced {}: {} added, {} updated, {} deleted",
            self.mapping.resource, stats.added, stats.updated, stats.deleted
        );
        Ok(stats)
    }

    /// Resyncs every period until `token` is cancelled.
    ///
    /// List failures are logged and retried on the next period.
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            "Watching {} in {}",
            self.mapping.resource,
            self.namespace.as_deref().unwrap_or("all namespaces")
        );
        loop {
            if let Err(e) = self.resync().await {
                warn!("Resync of {} failed: {}", self.mapping.resource, e);
            }
            if pause(self.resync_period, &token, "watch").await.is_err() {
                info!("Stopped watching {}", self.mapping.resource);
                return;
            }
        }
    }

    /// Runs the watcher on a background task.
    #[must_use]
    pub fn spawn(self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
