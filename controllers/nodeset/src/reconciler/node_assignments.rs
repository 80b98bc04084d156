//! Node pinning for NodeSet pods.
//!
//! With `lockNodes` set, each pod name is pinned to the first Kubernetes node
//! it was bound to. Pins survive pod deletion and rescheduling, so the next
//! pod with that name is scheduled back onto the same node. A positive
//! `lockNodeLifetime` lets pins expire once no running pod has confirmed
//! them for that many seconds.

use crate::pod_state::{bound_node, is_running, pod_name};
use chrono::{DateTime, Duration, Utc};
use crds::NodeAssignment;
use k8s_openapi::api::core::v1::Pod;
use std::collections::{BTreeMap, BTreeSet};

/// Pins keyed by pod name
pub type NodeAssignments = BTreeMap<String, NodeAssignment>;

/// Compute the next pin map from the stored pins and observed pods.
///
/// Returns `None` when locking is disabled or nothing is pinned.
pub fn compute_node_assignments(
    lock_nodes: bool,
    lock_node_lifetime: i32,
    existing: Option<&NodeAssignments>,
    pods: &[Pod],
    now: DateTime<Utc>,
) -> Option<NodeAssignments> {
    if !lock_nodes {
        return None;
    }

    let mut assignments: NodeAssignments = existing
        .into_iter()
        .flatten()
        .map(|(pod, assignment)| {
            let stamped = NodeAssignment::new(
                assignment.node_name.clone(),
                assignment.assigned_at.unwrap_or(now),
            );
            (pod.clone(), stamped)
        })
        .collect();

    let bound: BTreeMap<&str, (&str, bool)> = pods
        .iter()
        .filter_map(|pod| {
            bound_node(pod).map(|node| (pod_name(pod), (node, is_running(pod))))
        })
        .collect();

    // A running occupant of its pinned node is refreshed below, never expired
    if lock_node_lifetime > 0 {
        let lifetime = Duration::seconds(i64::from(lock_node_lifetime));
        assignments.retain(|pod, assignment| {
            let occupied = bound.get(pod.as_str()).is_some_and(|(node, running)| {
                *running && *node == assignment.node_name
            });
            let assigned_at = assignment.assigned_at.unwrap_or(now);
            occupied || now - assigned_at <= lifetime
        });
    }

    for (pod, (node, running)) in &bound {
        match assignments.get_mut(*pod) {
            None => {
                assignments.insert((*pod).to_string(), NodeAssignment::new(*node, now));
            }
            Some(assignment) if assignment.node_name == *node && *running => {
                assignment.assigned_at = Some(now);
            }
            // Sticky: a pin is never moved to another node here
            Some(_) => {}
        }
    }

    let bound_names: BTreeSet<&str> = bound.keys().copied().collect();
    assignments.retain(|pod, _| bound_names.contains(pod.as_str()));

    if assignments.is_empty() {
        None
    } else {
        Some(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pod;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pins(entries: &[(&str, &str, DateTime<Utc>)]) -> NodeAssignments {
        entries
            .iter()
            .map(|(pod, node, at)| (pod.to_string(), NodeAssignment::new(*node, *at)))
            .collect()
    }

    #[test]
    fn test_disabled_drops_existing_pins() {
        let existing = pins(&[("foo-0", "node-1", now())]);
        let pods = vec![pod("foo-0", Some("node-1"), "Running")];

        assert_eq!(compute_node_assignments(false, 0, Some(&existing), &pods, now()), None);
    }

    #[test]
    fn test_new_pins_for_bound_pods() {
        let pods = vec![
            pod("foo-0", Some("node-1"), "Running"),
            pod("foo-1", Some("node-2"), "Pending"),
        ];

        assert_eq!(
            compute_node_assignments(true, 0, None, &pods, now()),
            Some(pins(&[("foo-0", "node-1", now()), ("foo-1", "node-2", now())]))
        );
    }

    #[test]
    fn test_unbound_pod_is_not_pinned() {
        let pods = vec![pod("foo-0", None, "Pending"), pod("foo-1", Some(""), "Pending")];

        assert_eq!(compute_node_assignments(true, 0, None, &pods, now()), None);
    }

    #[test]
    fn test_expired_pin_without_pods_is_pruned() {
        let existing = pins(&[("foo-0", "node-1", now() - Duration::seconds(600))]);

        assert_eq!(compute_node_assignments(true, 300, Some(&existing), &[], now()), None);
    }

    #[test]
    fn test_running_pod_refreshes_pin_before_expiry() {
        let existing = pins(&[("foo-0", "node-1", now() - Duration::seconds(299))]);
        let pods = vec![pod("foo-0", Some("node-1"), "Running")];

        assert_eq!(
            compute_node_assignments(true, 300, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", now())]))
        );
    }

    #[test]
    fn test_running_pod_keeps_old_pin_alive() {
        let existing = pins(&[("foo-0", "node-1", now() - Duration::seconds(3600))]);
        let pods = vec![pod("foo-0", Some("node-1"), "Running")];

        assert_eq!(
            compute_node_assignments(true, 300, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", now())]))
        );
    }

    #[test]
    fn test_pending_pod_does_not_refresh_pin() {
        let assigned = now() - Duration::seconds(100);
        let existing = pins(&[("foo-0", "node-1", assigned)]);
        let pods = vec![pod("foo-0", Some("node-1"), "Pending")];

        assert_eq!(
            compute_node_assignments(true, 300, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", assigned)]))
        );
    }

    #[test]
    fn test_pin_is_sticky_when_pod_moves() {
        let assigned = now() - Duration::seconds(100);
        let existing = pins(&[("foo-0", "node-1", assigned)]);
        let pods = vec![pod("foo-0", Some("node-2"), "Running")];

        assert_eq!(
            compute_node_assignments(true, 0, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", assigned)]))
        );
    }

    #[test]
    fn test_expired_pin_is_recorded_again_for_bound_pod() {
        let existing = pins(&[("foo-0", "node-1", now() - Duration::seconds(600))]);
        let pods = vec![pod("foo-0", Some("node-2"), "Pending")];

        assert_eq!(
            compute_node_assignments(true, 300, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-2", now())]))
        );
    }

    #[test]
    fn test_scale_down_prunes_absent_pods() {
        let existing = pins(&[("foo-0", "node-1", now()), ("foo-1", "node-2", now())]);
        let pods = vec![pod("foo-0", Some("node-1"), "Running")];

        assert_eq!(
            compute_node_assignments(true, 0, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", now())]))
        );
    }

    #[test]
    fn test_zero_lifetime_never_expires() {
        let assigned = now() - Duration::days(365);
        let existing = pins(&[("foo-0", "node-1", assigned)]);
        let pods = vec![pod("foo-0", Some("node-1"), "Failed")];

        assert_eq!(
            compute_node_assignments(true, 0, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", assigned)]))
        );
    }

    #[test]
    fn test_missing_timestamp_treated_as_now() {
        let mut existing = NodeAssignments::new();
        existing.insert(
            "foo-0".to_string(),
            NodeAssignment { node_name: "node-1".to_string(), assigned_at: None },
        );
        let pods = vec![pod("foo-0", Some("node-1"), "Pending")];

        assert_eq!(
            compute_node_assignments(true, 300, Some(&existing), &pods, now()),
            Some(pins(&[("foo-0", "node-1", now())]))
        );
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let existing = pins(&[
            ("foo-0", "node-1", now() - Duration::seconds(600)),
            ("foo-1", "node-2", now() - Duration::seconds(100)),
            ("foo-2", "node-3", now() - Duration::seconds(50)),
        ]);
        let pods = vec![
            pod("foo-0", Some("node-4"), "Pending"),
            pod("foo-1", Some("node-9"), "Running"),
            pod("foo-2", Some("node-3"), "Running"),
            pod("foo-3", Some("node-5"), "Pending"),
            pod("foo-4", None, "Pending"),
        ];

        let first = compute_node_assignments(true, 300, Some(&existing), &pods, now());
        let second = compute_node_assignments(true, 300, first.as_ref(), &pods, now());

        assert_eq!(first, second);
        assert!(first.is_some_and(|pins| !pins.contains_key("foo-4")));
    }
}
