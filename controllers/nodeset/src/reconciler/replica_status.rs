//! Replica counts for a NodeSet.

use crate::pod_state::{is_available, is_ready, revision_label};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;

/// Aggregate pod counts written into the NodeSet status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub replicas: i32,
    pub ready: i32,
    pub available: i32,
    pub current: i32,
    pub updated: i32,
    pub unavailable: i32,
}

/// Count pods by readiness, availability and revision.
///
/// A pod counts as current or updated when its revision label equals the
/// given revision hash. An empty revision hash matches no pod.
pub fn calculate_replica_status(
    pods: &[Pod],
    current_revision: &str,
    update_revision: &str,
    min_ready_seconds: i32,
    now: DateTime<Utc>,
) -> ReplicaStatus {
    let mut status = ReplicaStatus::default();

    for pod in pods {
        status.replicas += 1;
        if is_ready(pod) {
            status.ready += 1;
            if is_available(pod, min_ready_seconds, now) {
                status.available += 1;
            }
        }
        if let Some(revision) = revision_label(pod).filter(|r| !r.is_empty()) {
            if revision == current_revision {
                status.current += 1;
            }
            if revision == update_revision {
                status.updated += 1;
            }
        }
    }

    status.unavailable = status.replicas - status.available;
    status
}
