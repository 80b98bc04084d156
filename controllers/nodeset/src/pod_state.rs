//! Read-only views over observed Pod state.

use crate::labels::REVISION_LABEL;
use crate::time::from_k8s_time;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{Pod, PodCondition};

/// Phase of a pod bound and started on a node
pub const POD_RUNNING: &str = "Running";
/// Pod condition type for readiness
pub const POD_READY: &str = "Ready";

/// Pod name, empty if unset
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// Node the pod is bound to, `None` while unscheduled
pub fn bound_node(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|node| !node.is_empty())
}

/// True when the pod phase is `Running`
pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(POD_RUNNING)
}

/// True once the pod has been marked for deletion
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Conditions reported in the pod status
pub fn pod_conditions(pod: &Pod) -> &[PodCondition] {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .unwrap_or_default()
}

/// Condition of the given type, if reported
pub fn pod_condition<'a>(pod: &'a Pod, condition_type: &str) -> Option<&'a PodCondition> {
    pod_conditions(pod)
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

/// Running with a `Ready=True` condition
pub fn is_ready(pod: &Pod) -> bool {
    is_running(pod)
        && pod_condition(pod, POD_READY).is_some_and(|condition| condition.status == "True")
}

/// Ready, and ready for at least `min_ready_seconds` as of `now`
pub fn is_available(pod: &Pod, min_ready_seconds: i32, now: DateTime<Utc>) -> bool {
    if !is_ready(pod) {
        return false;
    }
    if min_ready_seconds <= 0 {
        return true;
    }
    pod_condition(pod, POD_READY)
        .and_then(|condition| condition.last_transition_time.as_ref())
        .and_then(from_k8s_time)
        .is_some_and(|since| since + Duration::seconds(i64::from(min_ready_seconds)) <= now)
}

/// Revision hash label of the pod
pub fn revision_label(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(REVISION_LABEL))
        .map(String::as_str)
}

/// Ordinal of a pod named `<nodeset>-<ordinal>`
pub fn ordinal(nodeset_name: &str, pod_name: &str) -> Option<i32> {
    let digits = pod_name.strip_prefix(nodeset_name)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Name of the pod with the given ordinal
pub fn pod_name_for(nodeset_name: &str, ordinal: i32) -> String {
    format!("{}-{}", nodeset_name, ordinal)
}
