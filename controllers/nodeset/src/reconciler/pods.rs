//! Worker pod lifecycle: scaling and rolling updates.
//!
//! Pods are named `<nodeset>-<ordinal>`. Missing ordinals below the desired
//! count are created, ordinals at or above it are deleted highest first, and
//! once the set is stable and fully ready one outdated pod at a time is
//! deleted so it is recreated from the update revision.

use super::Reconciler;
use super::revision::RevisionState;
use crate::builder::new_nodeset_pod;
use crate::error::ControllerError;
use crate::pod_state::{is_ready, is_terminating, ordinal, pod_name, pod_name_for, revision_label};
use crds::NodeSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Outcome of a pod sync
#[derive(Debug, Default)]
pub struct PodSync {
    /// Whether any pod was created or deleted
    pub changed: bool,
    /// Failures collected during the pass
    pub errors: Vec<ControllerError>,
}

impl Reconciler {
    /// Create, delete and roll pods towards the desired state
    pub async fn sync_pods(
        &self,
        nodeset: &NodeSet,
        pods: &[Pod],
        revisions: &RevisionState,
    ) -> PodSync {
        let namespace = nodeset.namespace().unwrap_or_default();
        let name = nodeset.name_any();
        let desired = nodeset.desired_replicas().max(0);
        let mut result = PodSync::default();

        let by_ordinal: BTreeMap<i32, &Pod> = pods
            .iter()
            .filter_map(|pod| ordinal(&name, pod_name(pod)).map(|ordinal| (ordinal, pod)))
            .collect();

        let missing: Vec<i32> = (0..desired).filter(|o| !by_ordinal.contains_key(o)).collect();
        let condemned: Vec<&Pod> = by_ordinal
            .range(desired..)
            .rev()
            .map(|(_, pod)| *pod)
            .filter(|pod| !is_terminating(pod))
            .collect();

        for ordinal in &missing {
            match self.create_worker_pod(nodeset, *ordinal, revisions.update_hash()).await {
                Ok(()) => result.changed = true,
                Err(e) if e.is_conflict() => {
                    debug!("Pod {} already exists", pod_name_for(&name, *ordinal));
                }
                Err(e) => result.errors.push(e),
            }
        }

        for pod in &condemned {
            info!("Scaling down NodeSet {}/{}: deleting pod {}", namespace, name, pod_name(pod));
            match self.kube.delete_pod(&namespace, pod_name(pod)).await {
                Ok(()) => result.changed = true,
                Err(e) if e.is_not_found() => {}
                Err(e) => result.errors.push(e),
            }
        }

        if !missing.is_empty() || !condemned.is_empty() {
            return result;
        }

        if let Some(outdated) = next_outdated_pod(&by_ordinal, desired, revisions.update_hash()) {
            info!(
                "Rolling update of NodeSet {}/{}: deleting pod {} (revision {:?}, want {})",
                namespace,
                name,
                pod_name(outdated),
                revision_label(outdated),
                revisions.update_hash()
            );
            match self.kube.delete_pod(&namespace, pod_name(outdated)).await {
                Ok(()) => result.changed = true,
                Err(e) if e.is_not_found() => {}
                Err(e) => result.errors.push(e),
            }
        }

        result
    }

    async fn create_worker_pod(
        &self,
        nodeset: &NodeSet,
        ordinal: i32,
        revision_hash: &str,
    ) -> Result<(), ControllerError> {
        let namespace = nodeset.namespace().unwrap_or_default();
        let pod_name = pod_name_for(&nodeset.name_any(), ordinal);
        let assignment = nodeset
            .spec
            .lock_nodes
            .then(|| {
                nodeset
                    .status
                    .as_ref()
                    .and_then(|status| status.node_assignments.as_ref())
                    .and_then(|assignments| assignments.get(&pod_name))
            })
            .flatten();

        let pod = new_nodeset_pod(nodeset, ordinal, revision_hash, assignment)?;
        match assignment {
            Some(assignment) => info!(
                "Creating pod {}/{} pinned to node {}",
                namespace, pod_name, assignment.node_name
            ),
            None => info!("Creating pod {}/{}", namespace, pod_name),
        }
        self.kube.create_pod(&namespace, &pod).await?;
        Ok(())
    }
}

/// Highest-ordinal pod not on the update revision, once every pod is ready
fn next_outdated_pod<'a>(
    by_ordinal: &BTreeMap<i32, &'a Pod>,
    desired: i32,
    update_hash: &str,
) -> Option<&'a Pod> {
    if update_hash.is_empty() || by_ordinal.len() != usize::try_from(desired).unwrap_or(0) {
        return None;
    }
    if by_ordinal.values().any(|pod| is_terminating(pod) || !is_ready(pod)) {
        return None;
    }
    by_ordinal
        .values()
        .rev()
        .find(|pod| revision_label(pod) != Some(update_hash))
        .copied()
}
