//! In-process versioned object store.
//!
//! Behaves like an API server for the calls the engine makes: it assigns
//! uids, creation timestamps and increasing resource versions, applies both
//! patch formats, rejects stale replaces and keeps deleted objects around
//! for a configurable number of reads. Every call is counted and failures
//! can be injected per verb.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, ApplyKitError, InputError, Result};
use crate::object::{LiveObjectHandle, Object};
use crate::patch::{PatchEnvelope, PatchMeta, PatchType, apply_merge_patch, apply_strategic_patch};
use crate::resource::{RestMapping, TypeCatalog, TypeEntry};

use super::{DeleteOptions, ObjectList, ObjectStore};

/// Store operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `get`.
    Get,
    /// `create`.
    Create,
    /// `replace`.
    Replace,
    /// `patch`.
    Patch,
    /// `delete`.
    Delete,
    /// `list`.
    List,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Replace => "replace",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

type ErrorFactory = Box<dyn Fn(&str) -> ApplyKitError + Send + Sync>;

struct Failure {
    /// Calls let through before failing.
    skip: usize,
    remaining: Option<usize>,
    make: ErrorFactory,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    resource: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Self {
        Self {
            resource: mapping.resource.clone(),
            namespace: namespace.filter(|_| mapping.is_namespaced()).map(String::from),
            name: name.to_string(),
        }
    }

    fn of(handle: &LiveObjectHandle) -> Self {
        Self::new(&handle.mapping, handle.namespace(), &handle.name)
    }
}

struct Entry {
    object: Object,
    /// Reads left before a deleted object disappears.
    terminating: Option<usize>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Entry>,
    version: u64,
    calls: HashMap<Verb, usize>,
    failures: HashMap<Verb, Failure>,
}

impl Inner {
    fn record(&mut self, verb: Verb, name: &str) -> Result<()> {
        *self.calls.entry(verb).or_default() += 1;

        let (err, exhausted) = {
            let Some(failure) = self.failures.get_mut(&verb) else {
                return Ok(());
            };
            if failure.skip > 0 {
                failure.skip -= 1;
                return Ok(());
            }
            match failure.remaining {
                Some(0) => (None, true),
                Some(n) => {
                    failure.remaining = Some(n - 1);
                    (Some((failure.make)(name)), n == 1)
                }
                None => (Some((failure.make)(name)), false),
            }
        };
        if exhausted {
            self.failures.remove(&verb);
        }
        err.map_or(Ok(()), Err)
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Counts down terminating objects and drops the ones that are gone.
    fn settle(&mut self, key: &Key) {
        let gone = match self.objects.get_mut(key) {
            Some(Entry {
                terminating: Some(0), ..
            }) => true,
            Some(Entry {
                terminating: Some(n), ..
            }) => {
                *n -= 1;
                false
            }
            _ => false,
        };
        if gone {
            self.objects.remove(key);
        }
    }
}

/// In-process [`ObjectStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    catalog: TypeCatalog,
    deletion_delay: usize,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("deletion_delay", &self.deletion_delay)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(TypeCatalog::builtin())
    }
}

impl MemoryStore {
    /// Creates an empty store using `catalog` to apply structural patches.
    #[must_use]
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            catalog,
            deletion_delay: 0,
        }
    }

    /// Keeps deleted objects readable for `reads` more gets.
    #[must_use]
    pub const fn with_deletion_delay(mut self, reads: usize) -> Self {
        self.deletion_delay = reads;
        self
    }

    /// Makes the next `times` calls of `verb` fail with the produced error.
    pub async fn fail_times<F>(&self, verb: Verb, times: usize, make: F)
    where
        F: Fn(&str) -> ApplyKitError + Send + Sync + 'static,
    {
        self.inner.lock().await.failures.insert(
            verb,
            Failure {
                skip: 0,
                remaining: Some(times),
                make: Box::new(make),
            },
        );
    }

    /// Makes every call of `verb` fail with the produced error.
    pub async fn fail_always<F>(&self, verb: Verb, make: F)
    where
        F: Fn(&str) -> ApplyKitError + Send + Sync + 'static,
    {
        self.fail_after(verb, 0, make).await;
    }

    /// Lets `skip` calls of `verb` succeed, then fails every later one.
    pub async fn fail_after<F>(&self, verb: Verb, skip: usize, make: F)
    where
        F: Fn(&str) -> ApplyKitError + Send + Sync + 'static,
    {
        self.inner.lock().await.failures.insert(
            verb,
            Failure {
                skip,
                remaining: None,
                make: Box::new(make),
            },
        );
    }

    /// Number of calls made for `verb`.
    pub async fn calls(&self, verb: Verb) -> usize {
        self.inner.lock().await.calls.get(&verb).copied().unwrap_or_default()
    }

    /// Returns the stored object without counting a call.
    pub async fn stored(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Option<Object> {
        self.inner
            .lock()
            .await
            .objects
            .get(&Key::new(mapping, namespace, name))
            .map(|e| e.object.clone())
    }

    /// Changes a stored object the way another actor would, bumping its version.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the object does not exist.
    pub async fn modify<F>(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Object) + Send,
    {
        let mut inner = self.inner.lock().await;
        let version = inner.next_version();
        let entry = inner
            .objects
            .get_mut(&Key::new(mapping, namespace, name))
            .ok_or_else(|| ApiError::not_found(&mapping.resource, name))?;
        change(&mut entry.object);
        entry.object.set_resource_version(Some(&version));
        Ok(())
    }

    fn patch_meta(&self, handle: &LiveObjectHandle) -> Result<PatchMeta> {
        match self.catalog.entry(&handle.mapping.gvk) {
            Some(TypeEntry::Structured(meta)) => Ok(meta.clone()),
            _ => Err(ApiError::Status {
                code: 415,
                reason: String::from("UnsupportedMediaType"),
                message: format!(
                    "structural merge patch is not supported for {}",
                    handle.mapping.gvk
                ),
            }
            .into()),
        }
    }
}

/// Copies server-owned metadata from the stored object onto an update.
fn carry_server_fields(stored: &Object, update: &mut Object) {
    let Some(stored_meta) = stored.metadata().cloned() else {
        return;
    };
    if !matches!(update.as_map().get("metadata"), Some(Value::Object(_))) {
        update
            .as_map_mut()
            .insert(String::from("metadata"), Value::Object(Map::new()));
    }
    let Some(Value::Object(meta)) = update.as_map_mut().get_mut("metadata") else {
        return;
    };
    for field in ["name", "namespace", "uid", "creationTimestamp"] {
        match stored_meta.get(field) {
            Some(value) => {
                meta.insert(field.to_string(), value.clone());
            }
            None => {
                meta.remove(field);
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, handle: &LiveObjectHandle) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Get, &handle.name)?;

        let key = Key::of(handle);
        inner.settle(&key);
        inner
            .objects
            .get(&key)
            .map(|e| e.object.clone())
            .ok_or_else(|| ApiError::not_found(&handle.mapping.resource, &handle.name).into())
    }

    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Object) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        let requested = object.name().or_else(|| object.generate_name()).unwrap_or_default();
        inner.record(Verb::Create, requested)?;

        let mut created = object.clone();
        let name = match (object.name(), object.generate_name()) {
            (Some(name), _) => name.to_string(),
            (None, Some(prefix)) => {
                let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
                format!("{prefix}{suffix}")
            }
            (None, None) => {
                return Err(InputError::MissingField {
                    field: String::from("metadata.name"),
                }
                .into());
            }
        };

        let key = Key::new(mapping, namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                resource: mapping.resource.clone(),
                name,
            }
            .into());
        }

        let version = inner.next_version();
        created.set_name(&name);
        if let Some(ns) = &key.namespace {
            created.set_namespace(ns);
        }
        created.set_resource_version(Some(&version));
        if let Some(Value::Object(meta)) = created.as_map_mut().get_mut("metadata") {
            meta.insert(String::from("uid"), Value::String(Uuid::new_v4().to_string()));
            meta.insert(
                String::from("creationTimestamp"),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }

        debug!("memory store created {}/{} at version {}", mapping.resource, name, version);
        inner.objects.insert(
            key,
            Entry {
                object: created.clone(),
                terminating: None,
            },
        );
        Ok(created)
    }

    async fn replace(&self, handle: &LiveObjectHandle, object: &Object) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Replace, &handle.name)?;

        let key = Key::of(handle);
        let stored = inner
            .objects
            .get(&key)
            .map(|e| e.object.clone())
            .ok_or_else(|| ApiError::not_found(&handle.mapping.resource, &handle.name))?;

        if let Some(requested) = object.resource_version() {
            if Some(requested) != stored.resource_version() {
                return Err(ApiError::conflict(
                    &handle.name,
                    "the object has been modified; please apply your changes to the latest version",
                )
                .into());
            }
        }

        let mut updated = object.clone();
        carry_server_fields(&stored, &mut updated);
        let version = inner.next_version();
        updated.set_resource_version(Some(&version));
        if let Some(entry) = inner.objects.get_mut(&key) {
            entry.object = updated.clone();
        }
        Ok(updated)
    }

    async fn patch(&self, handle: &LiveObjectHandle, patch: &PatchEnvelope) -> Result<Object> {
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Patch, &handle.name)?;

        let key = Key::of(handle);
        let stored = inner
            .objects
            .get(&key)
            .map(|e| e.object.clone())
            .ok_or_else(|| ApiError::not_found(&handle.mapping.resource, &handle.name))?;

        let body: Value = serde_json::from_slice(&patch.bytes)?;
        let current = stored.clone().into_value();
        let patched = match patch.patch_type {
            PatchType::JsonMerge => apply_merge_patch(&current, &body),
            PatchType::StrategicMerge => apply_strategic_patch(&current, &body, &self.patch_meta(handle)?)?,
        };

        let mut updated = Object::from_value(patched)?;
        carry_server_fields(&stored, &mut updated);
        let version = inner.next_version();
        updated.set_resource_version(Some(&version));
        if let Some(entry) = inner.objects.get_mut(&key) {
            entry.object = updated.clone();
        }
        Ok(updated)
    }

    async fn delete(&self, handle: &LiveObjectHandle, _options: &DeleteOptions) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Delete, &handle.name)?;

        let key = Key::of(handle);
        let delay = self.deletion_delay;
        let entry = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| ApiError::not_found(&handle.mapping.resource, &handle.name))?;
        if entry.terminating.is_some() {
            return Ok(());
        }
        if delay == 0 {
            inner.objects.remove(&key);
        } else {
            entry.terminating = Some(delay);
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            if let Some(Value::Object(meta)) = entry.object.as_map_mut().get_mut("metadata") {
                meta.insert(String::from("deletionTimestamp"), Value::String(now));
            }
        }
        Ok(())
    }

    async fn list(&self, mapping: &RestMapping, namespace: Option<&str>) -> Result<ObjectList> {
        let mut inner = self.inner.lock().await;
        inner.record(Verb::List, &mapping.resource)?;

        let items = inner
            .objects
            .iter()
            .filter(|(key, _)| key.resource == mapping.resource)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .map(|(_, entry)| entry.object.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: Some(inner.version.to_string()),
        })
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
