//! Object metadata common to cluster resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity and bookkeeping fields shared by workflows and pods.
///
/// Labels and annotations use ordered maps so that serialized objects are
/// byte-stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name, unique within its namespace.
    pub name: String,

    /// Namespace the resource lives in.
    #[serde(default)]
    pub namespace: String,

    /// Labels attached to the resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations attached to the resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Creates metadata with the given name and namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Returns the value of a label, if present.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Returns true if the label is present with exactly the given value.
    #[must_use]
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.label(key) == Some(value)
    }

    /// Returns the value of an annotation, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup() {
        let mut meta = ObjectMeta::new("pod-1", "batch");
        meta.labels.insert("app".into(), "demo".into());

        assert_eq!(meta.label("app"), Some("demo"));
        assert!(meta.has_label("app", "demo"));
        assert!(!meta.has_label("app", "other"));
        assert_eq!(meta.label("missing"), None);
    }

    #[test]
    fn empty_maps_are_omitted_from_json() {
        let meta = ObjectMeta::new("pod-1", "batch");
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("labels"));
        assert!(!json.contains("annotations"));
    }
}
