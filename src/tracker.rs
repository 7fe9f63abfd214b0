//! Last-applied configuration tracking.
//!
//! The configuration an object was last applied with is stored on the object
//! itself, as a JSON string in a single annotation. It is the merge base
//! ("original") of the next three-way patch.

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::object::Object;

/// Suffix of the marker annotation key.
const LAST_APPLIED_SUFFIX: &str = "last-applied-configuration";

/// Reads and writes the last-applied marker of one tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationTracker {
    key: String,
}

impl ConfigurationTracker {
    /// Creates a tracker whose marker key is
    /// `<prefix>-<tracker_name>/last-applied-configuration`.
    #[must_use]
    pub fn new(prefix: &str, tracker_name: &str) -> Self {
        Self {
            key: format!("{prefix}-{tracker_name}/{LAST_APPLIED_SUFFIX}"),
        }
    }

    /// Returns the marker annotation key.
    #[must_use]
    pub fn annotation_key(&self) -> &str {
        &self.key
    }

    /// Returns the stored configuration, `None` if the object carries no marker.
    #[must_use]
    pub fn original_configuration(&self, live: &Object) -> Option<Vec<u8>> {
        live.annotation(&self.key).map(|s| s.as_bytes().to_vec())
    }

    /// Stores `original` as the marker on `target`. Empty input is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if `original` is not UTF-8.
    pub fn set_original_configuration(&self, target: &mut Object, original: &[u8]) -> Result<()> {
        if original.is_empty() {
            return Ok(());
        }
        let value = std::str::from_utf8(original)
            .map_err(|e| TransportError::serialization(format!("configuration is not UTF-8: {e}")))?;
        target.set_annotation(&self.key, value);
        Ok(())
    }

    /// Serializes `object` as it would be applied.
    ///
    /// The marker is stripped before encoding so it never embeds itself.
    /// With `embed`, the result is embedded as the marker and the object is
    /// encoded again. Works on a copy; `object` is never touched.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn modified_configuration(&self, object: &Object, embed: bool) -> Result<Vec<u8>> {
        let mut copy = object.clone();
        copy.remove_annotation(&self.key);

        let modified = copy.to_vec()?;
        if !embed {
            return Ok(modified);
        }

        self.set_original_configuration(&mut copy, &modified)?;
        copy.to_vec()
    }

    /// Writes the first-time marker: the object's own configuration, not
    /// embedded in itself.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn create_apply_annotation(&self, target: &mut Object) -> Result<()> {
        let modified = self.modified_configuration(target, false)?;
        debug!("Writing {} byte apply marker {}", modified.len(), self.key);
        self.set_original_configuration(target, &modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> ConfigurationTracker {
        ConfigurationTracker::new("applykit", "operator")
    }

    fn desired() -> Object {
        Object::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "annotations": {"team": "core"}},
            "data": {"mode": "fast"}
        }))
        .expect("object")
    }

    #[test]
    fn test_annotation_key() {
        assert_eq!(
            tracker().annotation_key(),
            "applykit-operator/last-applied-configuration"
        );
    }

    #[test]
    fn test_original_absent_without_marker() {
        assert!(tracker().original_configuration(&desired()).is_none());
        let bare = Object::from_value(json!({"kind": "ConfigMap"})).expect("object");
        assert!(tracker().original_configuration(&bare).is_none());
    }

    #[test]
    fn test_set_original_ignores_empty_input() {
        let mut obj = Object::from_value(json!({"kind": "ConfigMap"})).expect("object");
        tracker().set_original_configuration(&mut obj, b"").expect("no-op");
        assert!(obj.metadata().is_none());

        tracker().set_original_configuration(&mut obj, b"{}").expect("set");
        assert_eq!(tracker().original_configuration(&obj), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_modified_is_pure_and_idempotent() {
        let mut obj = desired();
        obj.set_annotation(tracker().annotation_key(), "stale");
        let before = obj.clone();

        let first = tracker().modified_configuration(&obj, false).expect("first");
        let second = tracker().modified_configuration(&obj, false).expect("second");

        assert_eq!(first, second);
        assert_eq!(obj, before);
        let decoded = Object::from_slice(&first).expect("decode");
        assert!(decoded.annotation(tracker().annotation_key()).is_none());
        assert_eq!(decoded.annotation("team"), Some("core"));
    }

    #[test]
    fn test_modified_embeds_itself_once() {
        let obj = desired();
        let plain = tracker().modified_configuration(&obj, false).expect("plain");
        let embedded = tracker().modified_configuration(&obj, true).expect("embedded");

        let decoded = Object::from_slice(&embedded).expect("decode");
        assert_eq!(
            tracker().original_configuration(&decoded),
            Some(plain)
        );
        assert_eq!(obj, desired());
    }

    #[test]
    fn test_marker_only_annotations_are_dropped_from_modified() {
        let mut obj = Object::from_value(json!({"kind": "ConfigMap", "metadata": {"name": "a"}}))
            .expect("object");
        obj.set_annotation(tracker().annotation_key(), "{}");

        let modified = tracker().modified_configuration(&obj, false).expect("modified");
        assert_eq!(modified, br#"{"kind":"ConfigMap","metadata":{"name":"a"}}"#.to_vec());
    }

    #[test]
    fn test_create_apply_annotation() {
        let mut obj = desired();
        let expected = tracker().modified_configuration(&obj, false).expect("modified");

        tracker().create_apply_annotation(&mut obj).expect("marker");
        assert_eq!(tracker().original_configuration(&obj), Some(expected));
        assert_eq!(obj.annotation("team"), Some("core"));
    }
}
