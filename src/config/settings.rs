//! Cluster connection and engine timing settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::patch::EmptyPatchSet;
use crate::resource::ResourceDescriptor;

use super::apply::ApplyConfig;

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyKitConfig {
    /// API server connection.
    pub cluster: ClusterConfig,
    /// Base apply options.
    pub apply: ApplyConfig,
    /// Engine timing and naming.
    pub patcher: PatcherSettings,
    /// Custom resource kinds the tool can address.
    pub resources: Vec<ResourceDescriptor>,
}

impl ApplyKitConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.patcher.validate()?;

        let tracker = &self.apply.tracker_name;
        if tracker.is_empty() || tracker.contains('/') {
            return Err(ConfigError::invalid(
                "apply.tracker_name",
                "must be non-empty and must not contain '/'",
            )
            .into());
        }
        Ok(())
    }
}

/// API server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the API server.
    pub server: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Namespace for objects that do not name one.
    pub namespace: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server: String::from("https://127.0.0.1:6443"),
            token: None,
            namespace: String::from("default"),
            timeout_secs: 30,
            accept_invalid_certs: false,
        }
    }
}

impl ClusterConfig {
    fn validate(&self) -> Result<()> {
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return Err(ConfigError::invalid("cluster.server", "must be an http(s) URL").into());
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::invalid("cluster.namespace", "must not be empty").into());
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("cluster.timeout_secs", "must be positive").into());
        }
        Ok(())
    }
}

/// Timing and naming knobs of the apply engine.
///
/// Injected at construction so no package-wide mutable defaults exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherSettings {
    /// Base interval of the conflict backoff, in milliseconds. Attempt `n`
    /// waits `n` times this long.
    pub backoff_interval_ms: u64,
    /// Interval between "is it gone yet" polls after a delete, in milliseconds.
    pub delete_poll_interval_ms: u64,
    /// Upper bound on the post-delete poll, in seconds. `None` polls until
    /// the object is gone or the call is cancelled.
    pub delete_timeout_secs: Option<u64>,
    /// Grace period handed to reapers, in seconds.
    pub reaper_grace_period_secs: u64,
    /// Prefix of the marker annotation key.
    pub annotation_prefix: String,
    /// Namespace assigned to namespaced objects that do not name one.
    pub default_namespace: String,
    /// Patches treated as no-ops.
    pub empty_patches: EmptyPatchSet,
}

impl Default for PatcherSettings {
    fn default() -> Self {
        Self {
            backoff_interval_ms: 1000,
            delete_poll_interval_ms: 1000,
            delete_timeout_secs: None,
            reaper_grace_period_secs: 120,
            annotation_prefix: String::from("applykit"),
            default_namespace: String::from("default"),
            empty_patches: EmptyPatchSet::default(),
        }
    }
}

impl PatcherSettings {
    /// Base backoff interval.
    #[must_use]
    pub const fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms)
    }

    /// Delete poll interval.
    #[must_use]
    pub const fn delete_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delete_poll_interval_ms)
    }

    /// Delete poll bound.
    #[must_use]
    pub fn delete_timeout(&self) -> Option<Duration> {
        self.delete_timeout_secs.map(Duration::from_secs)
    }

    /// Reaper grace period.
    #[must_use]
    pub const fn reaper_grace_period(&self) -> Duration {
        Duration::from_secs(self.reaper_grace_period_secs)
    }

    /// Sets the backoff interval.
    #[must_use]
    pub fn with_backoff_interval(mut self, interval: Duration) -> Self {
        self.backoff_interval_ms = millis(interval);
        self
    }

    /// Sets the delete poll interval.
    #[must_use]
    pub fn with_delete_poll_interval(mut self, interval: Duration) -> Self {
        self.delete_poll_interval_ms = millis(interval);
        self
    }

    /// Bounds the delete poll.
    #[must_use]
    pub const fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.annotation_prefix.is_empty() || self.annotation_prefix.contains('/') {
            return Err(ConfigError::invalid(
                "patcher.annotation_prefix",
                "must be non-empty and must not contain '/'",
            )
            .into());
        }
        if self.default_namespace.is_empty() {
            return Err(ConfigError::invalid("patcher.default_namespace", "must not be empty").into());
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
