//! Deserialized view of a Kubernetes `Node` object (C9's `NodeView` impl).

use crate::node::NodeView;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Annotation carrying the oracle timestamp [`Intent::stuck`] reads: when
/// the agent entered `busy` for its current `active` action.
///
/// [`Intent::stuck`]: crate::intent::Intent::stuck
pub const BUSY_SINCE_ANNOTATION: &str = "dogswatch.coreos.com/busy-since";

/// Mapping of the logical field names the core reads through [`NodeView::get`]
/// (`wanted`, `active`, `state`, `update-available`) to the label/annotation
/// keys actually carried on a cluster's `Node` objects.
///
/// The core itself never sees this mapping: `crate::intent::Intent::given`
/// asks for the logical names regardless of how a given cluster labels its
/// nodes, and this struct is the translation the Kube Adapter applies before
/// doing the labels-then-annotations lookup. The default matches spec §6's
/// literal wire strings; a cluster using a different naming convention (e.g.
/// a `dogswatch.coreos.com/` label prefix) can override it at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMetadataKeys {
    /// Wire key for the logical `wanted` field.
    pub wanted: String,
    /// Wire key for the logical `active` field.
    pub active: String,
    /// Wire key for the logical `state` field.
    pub state: String,
    /// Wire key for the logical `update-available` field.
    pub update_available: String,
}

impl Default for NodeMetadataKeys {
    fn default() -> Self {
        NodeMetadataKeys {
            wanted: "wanted".to_string(),
            active: "active".to_string(),
            state: "state".to_string(),
            update_available: "update-available".to_string(),
        }
    }
}

impl NodeMetadataKeys {
    /// Resolve a logical field name to its configured wire key. A name this
    /// mapping doesn't recognize is passed through unchanged.
    fn resolve(&self, logical: &str) -> &str {
        match logical {
            "wanted" => &self.wanted,
            "active" => &self.active,
            "state" => &self.state,
            "update-available" => &self.update_available,
            other => other,
        }
    }
}

/// A single Kubernetes `Node` object, as returned by the list/watch API.
///
/// Only the fields the core needs are kept; everything else in a real
/// Node object (status, addresses, taints, ...) is dropped on deserialize.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeRecord {
    pub(crate) metadata: NodeMetadata,
    #[serde(skip)]
    keys: Arc<NodeMetadataKeys>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodeMetadata {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) labels: HashMap<String, String>,
    #[serde(default)]
    pub(crate) annotations: HashMap<String, String>,
    /// Used to detect add/update/delete transitions across relist polls and
    /// to build conflict-free label patches for [`super::client::KubeClient`].
    #[serde(default)]
    pub(crate) resource_version: String,
}

impl NodeRecord {
    /// Look a logical field up across labels and annotations, after
    /// translating it to its configured wire key, labels winning on a
    /// collision (the wire keys in spec §6 are short enum-like strings,
    /// which fit label value constraints; annotations are the fallback
    /// for anything that doesn't).
    fn lookup(&self, key: &str) -> Option<&str> {
        let wire_key = self.keys.resolve(key);
        self.metadata
            .labels
            .get(wire_key)
            .or_else(|| self.metadata.annotations.get(wire_key))
            .map(|s| s.as_str())
    }

    pub(crate) fn resource_version(&self) -> &str {
        &self.metadata.resource_version
    }

    /// Attach a non-default metadata-key mapping, applied by the Kube
    /// Adapter after deserializing a list of raw Node objects.
    pub(crate) fn with_keys(mut self, keys: Arc<NodeMetadataKeys>) -> Self {
        self.keys = keys;
        self
    }
}

impl NodeView for NodeRecord {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.lookup(key)
    }

    fn busy_since(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .annotations
            .get(BUSY_SINCE_ANNOTATION)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> NodeRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reads_labels_and_falls_back_to_annotations() {
        let n = record(
            r#"{"metadata":{"name":"n1","labels":{"wanted":"stabilize"},"annotations":{"active":"stabilize"}}}"#,
        );
        assert_eq!(n.get("wanted"), Some("stabilize"));
        assert_eq!(n.get("active"), Some("stabilize"));
        assert_eq!(n.get("missing"), None);
    }

    #[test]
    fn labels_win_over_annotations_on_collision() {
        let n = record(
            r#"{"metadata":{"name":"n1","labels":{"state":"busy"},"annotations":{"state":"waiting"}}}"#,
        );
        assert_eq!(n.get("state"), Some("busy"));
    }

    #[test]
    fn lookup_checks_labels_then_annotations_for_each_key() {
        use maplit::hashmap;

        let n = NodeRecord {
            metadata: NodeMetadata {
                name: "n1".to_string(),
                labels: hashmap! { "wanted".to_string() => "perform_update".to_string() },
                annotations: hashmap! {
                    "wanted".to_string() => "stabilize".to_string(),
                    "active".to_string() => "perform_update".to_string(),
                },
                resource_version: "42".to_string(),
            },
            keys: Arc::new(NodeMetadataKeys::default()),
        };
        assert_eq!(n.get("wanted"), Some("perform_update"));
        assert_eq!(n.get("active"), Some("perform_update"));
        assert_eq!(n.resource_version(), "42");
    }

    #[test]
    fn custom_keys_translate_logical_names_to_configured_wire_keys() {
        let n = record(
            r#"{"metadata":{"name":"n1","labels":{"dogswatch-wanted":"perform_update"}}}"#,
        )
        .with_keys(Arc::new(NodeMetadataKeys {
            wanted: "dogswatch-wanted".to_string(),
            ..NodeMetadataKeys::default()
        }));
        assert_eq!(n.get("wanted"), Some("perform_update"));
        // An unmapped default key is unaffected by the override.
        assert_eq!(n.get("active"), None);
    }

    #[test]
    fn busy_since_parses_rfc3339_annotation() {
        let n = record(&format!(
            r#"{{"metadata":{{"name":"n1","annotations":{{"{}":"2026-01-01T00:00:00Z"}}}}}}"#,
            BUSY_SINCE_ANNOTATION
        ));
        assert!(n.busy_since().is_some());
    }

    #[test]
    fn busy_since_absent_or_malformed_is_none() {
        let n = record(r#"{"metadata":{"name":"n1"}}"#);
        assert_eq!(n.busy_since(), None);

        let n = record(&format!(
            r#"{{"metadata":{{"name":"n1","annotations":{{"{}":"not-a-time"}}}}}}"#,
            BUSY_SINCE_ANNOTATION
        ));
        assert_eq!(n.busy_since(), None);
    }
}
