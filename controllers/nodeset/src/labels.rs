//! Labels shared by NodeSet pods and ControllerRevisions.

use k8s_openapi::api::apps::v1::ControllerRevision;
use std::collections::BTreeMap;

/// Component label, always `slurmd` for worker pods
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Instance label, the owning NodeSet name
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// Revision hash a pod was created from (same key StatefulSets use)
pub const REVISION_LABEL: &str = "controller-revision-hash";
/// Value of [`NAME_LABEL`] for worker pods
pub const WORKER_COMPONENT: &str = "slurmd";

/// Labels selecting every pod and revision of a NodeSet
pub fn selector_labels(nodeset_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), nodeset_name.to_string()),
        (NAME_LABEL.to_string(), WORKER_COMPONENT.to_string()),
    ])
}

/// Render labels as a label selector (`k=v` sorted by key, comma separated)
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every selector label is present with the same value
pub fn matches_selector(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    let Some(labels) = labels else {
        return selector.is_empty();
    };
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Revision id of a ControllerRevision, its hash label
pub fn revision_hash(revision: &ControllerRevision) -> Option<&str> {
    revision
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(REVISION_LABEL))
        .map(String::as_str)
        .filter(|hash| !hash.is_empty())
}
