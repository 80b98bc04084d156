//! NodeSet status computation and persistence.

use super::Reconciler;
use super::node_assignments::{NodeAssignments, compute_node_assignments};
use super::replica_status::{ReplicaStatus, calculate_replica_status};
use super::revision::RevisionState;
use super::slurm_sync::SlurmCounts;
use crate::error::ControllerError;
use crate::labels::{selector_labels, selector_string};
use chrono::{DateTime, Utc};
use crds::{NodeSet, NodeSetStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

/// Merge the results of one pass into a status.
///
/// `slurm` is `None` when Slurm could not be queried; the stored Slurm
/// counts are carried over in that case.
pub fn build_status(
    nodeset: &NodeSet,
    replicas: &ReplicaStatus,
    slurm: Option<SlurmCounts>,
    node_assignments: Option<NodeAssignments>,
    revisions: &RevisionState,
) -> NodeSetStatus {
    let prior = nodeset.status.clone().unwrap_or_default();
    let slurm = slurm.unwrap_or(SlurmCounts {
        idle: prior.slurm_idle,
        allocated: prior.slurm_allocated,
        down: prior.slurm_down,
        drain: prior.slurm_drain,
    });

    let non_empty = |hash: &str| (!hash.is_empty()).then(|| hash.to_string());
    let rollout_done = replicas.updated == replicas.replicas
        && replicas.replicas == nodeset.desired_replicas();
    // A finished rollout makes the update revision current, and with it
    // every updated pod
    let (current_revision, current_replicas) = if rollout_done {
        (non_empty(revisions.update_hash()), replicas.updated)
    } else {
        (non_empty(revisions.current_hash()), replicas.current)
    };

    NodeSetStatus {
        replicas: replicas.replicas,
        ready_replicas: replicas.ready,
        available_replicas: replicas.available,
        current_replicas,
        updated_replicas: replicas.updated,
        unavailable_replicas: replicas.unavailable,
        slurm_idle: slurm.idle,
        slurm_allocated: slurm.allocated,
        slurm_down: slurm.down,
        slurm_drain: slurm.drain,
        node_set_hash: revisions.hash.clone(),
        current_revision,
        update_revision: non_empty(revisions.update_hash()),
        collision_count: Some(revisions.collision_count),
        selector: selector_string(&selector_labels(&nodeset.name_any())),
        node_assignments,
        observed_generation: nodeset.metadata.generation,
    }
}

impl Reconciler {
    /// Compute and persist the NodeSet status.
    ///
    /// `errors` are failures from earlier phases of the pass. They, any
    /// Slurm sync failures and a failed write are all returned together;
    /// none of them stops the status from being written.
    pub async fn sync_status(
        &self,
        nodeset: &NodeSet,
        pods: &[Pod],
        revisions: &RevisionState,
        errors: Vec<ControllerError>,
    ) -> Result<(), ControllerError> {
        self.sync_status_at(nodeset, pods, revisions, errors, Utc::now()).await
    }

    pub(crate) async fn sync_status_at(
        &self,
        nodeset: &NodeSet,
        pods: &[Pod],
        revisions: &RevisionState,
        mut errors: Vec<ControllerError>,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        let spec = &nodeset.spec;
        let prior_assignments = nodeset
            .status
            .as_ref()
            .and_then(|status| status.node_assignments.as_ref());

        let node_assignments = compute_node_assignments(
            spec.lock_nodes,
            spec.lock_node_lifetime,
            prior_assignments,
            pods,
            now,
        );

        let slurm = self.sync_slurm_status(nodeset, pods, now).await;
        errors.extend(slurm.errors);
        let counts = slurm.node_states.as_ref().map(SlurmCounts::from_node_states);

        let replicas = calculate_replica_status(
            pods,
            revisions.current_hash(),
            revisions.update_hash(),
            spec.min_ready_seconds,
            now,
        );

        let status = build_status(nodeset, &replicas, counts, node_assignments, revisions);
        if let Err(e) = self.update_nodeset_status(nodeset, status).await {
            errors.push(e);
        }

        ControllerError::aggregate(errors)
    }

    /// Persist `status` unless it is already stored.
    ///
    /// The write is conditioned on the NodeSet's resourceVersion; a NodeSet
    /// deleted in the meantime is not an error.
    pub async fn update_nodeset_status(
        &self,
        nodeset: &NodeSet,
        status: NodeSetStatus,
    ) -> Result<(), ControllerError> {
        let namespace = nodeset.namespace().unwrap_or_default();
        let name = nodeset.name_any();

        if nodeset.status.as_ref() == Some(&status) {
            debug!("NodeSet {}/{} status unchanged", namespace, name);
            return Ok(());
        }

        match self.kube.update_nodeset_status(nodeset, &status).await {
            Ok(()) => {
                info!(
                    "Updated NodeSet {}/{} status: replicas={} ready={} updated={} slurmIdle={}",
                    namespace,
                    name,
                    status.replicas,
                    status.ready_replicas,
                    status.updated_replicas,
                    status.slurm_idle
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("NodeSet {}/{} is gone, dropping status update", namespace, name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
