//! ControllerRevision history for NodeSets.
//!
//! The update revision snapshots the parts of the spec that shape a worker
//! pod. Its hash labels every pod created from it, which is how pods are
//! classified as current or updated.

use super::Reconciler;
use crate::error::ControllerError;
use crate::labels::{REVISION_LABEL, revision_hash, selector_labels, selector_string};
use crds::NodeSet;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Attempts at finding a free revision name before giving up
const MAX_HASH_COLLISIONS: i32 = 16;

/// Revisions in play for one reconcile pass
#[derive(Debug, Clone)]
pub struct RevisionState {
    /// Revision the current replicas were created from
    pub current: ControllerRevision,
    /// Revision new replicas are created from
    pub update: ControllerRevision,
    /// Collision count used to name the update revision
    pub collision_count: i32,
    /// Spec hash of the update revision
    pub hash: String,
}

impl RevisionState {
    /// Hash label of the current revision, empty if unlabelled
    pub fn current_hash(&self) -> &str {
        revision_hash(&self.current).unwrap_or_default()
    }

    /// Hash label of the update revision, empty if unlabelled
    pub fn update_hash(&self) -> &str {
        revision_hash(&self.update).unwrap_or_default()
    }
}

/// Spec fields captured by a revision
pub fn revision_data(nodeset: &NodeSet) -> Result<serde_json::Value, ControllerError> {
    Ok(serde_json::json!({
        "template": serde_json::to_value(&nodeset.spec.template)?,
        "slurmd": serde_json::to_value(&nodeset.spec.slurmd)?,
        "extraConf": nodeset.spec.extra_conf,
        "controllerRef": serde_json::to_value(&nodeset.spec.controller_ref)?,
    }))
}

/// Short hex hash of revision data salted with the collision count
pub fn compute_hash(
    data: &serde_json::Value,
    collision_count: i32,
) -> Result<String, ControllerError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(data)?);
    hasher.update(collision_count.to_le_bytes());
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..5]))
}

/// Name of the revision with `hash`
pub fn revision_name(nodeset_name: &str, hash: &str) -> String {
    format!("{}-{}", nodeset_name, hash)
}

/// Build an unsaved revision for `nodeset`
pub fn new_revision(
    nodeset: &NodeSet,
    data: serde_json::Value,
    hash: &str,
    revision: i64,
) -> ControllerRevision {
    let mut labels = selector_labels(&nodeset.name_any());
    labels.insert(REVISION_LABEL.to_string(), hash.to_string());

    ControllerRevision {
        metadata: ObjectMeta {
            name: Some(revision_name(&nodeset.name_any(), hash)),
            namespace: nodeset.namespace(),
            labels: Some(labels),
            owner_references: nodeset.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        data: Some(RawExtension(data)),
        revision,
    }
}

/// Whether an object belongs to the NodeSet with `uid` (any owner when unknown)
pub fn owned_by(metadata: &ObjectMeta, uid: Option<&str>) -> bool {
    let Some(uid) = uid else {
        return true;
    };
    metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == uid)
}

impl Reconciler {
    /// Ensure the update revision exists, pick the current one and trim history
    pub async fn sync_revisions(
        &self,
        nodeset: &NodeSet,
    ) -> Result<RevisionState, ControllerError> {
        let namespace = nodeset.namespace().unwrap_or_default();
        let name = nodeset.name_any();
        let selector = selector_string(&selector_labels(&name));
        let uid = nodeset.metadata.uid.as_deref();

        let mut owned: Vec<ControllerRevision> = self
            .kube
            .list_revisions(&namespace, &selector)
            .await?
            .into_iter()
            .filter(|revision| owned_by(&revision.metadata, uid))
            .collect();
        owned.sort_by_key(|revision| revision.revision);

        let data = revision_data(nodeset)?;
        let mut collision_count = nodeset
            .status
            .as_ref()
            .and_then(|status| status.collision_count)
            .unwrap_or(0);

        let equal = owned
            .iter()
            .rev()
            .find(|revision| revision.data.as_ref().is_some_and(|d| d.0 == data))
            .cloned();

        let update = match equal {
            Some(existing) => existing,
            None => {
                let next_revision = owned.last().map_or(1, |revision| revision.revision + 1);
                let mut created = None;
                for _ in 0..MAX_HASH_COLLISIONS {
                    let hash = compute_hash(&data, collision_count)?;
                    let revision_name = revision_name(&name, &hash);
                    if owned.iter().any(|revision| revision.name_any() == revision_name) {
                        debug!(
                            "Revision name {} taken by different data, bumping collision count",
                            revision_name
                        );
                        collision_count += 1;
                        continue;
                    }
                    let revision = new_revision(nodeset, data.clone(), &hash, next_revision);
                    info!(
                        "Creating ControllerRevision {}/{} (revision {})",
                        namespace, revision_name, next_revision
                    );
                    created = Some(self.kube.create_revision(&namespace, &revision).await?);
                    break;
                }
                created.ok_or_else(|| {
                    ControllerError::Conflict(format!(
                        "no free revision name for NodeSet {}/{} after {} collisions",
                        namespace, name, MAX_HASH_COLLISIONS
                    ))
                })?
            }
        };

        let stored_current = nodeset
            .status
            .as_ref()
            .and_then(|status| status.current_revision.as_deref());
        let current = stored_current
            .and_then(|hash| owned.iter().find(|revision| revision_hash(revision) == Some(hash)))
            .cloned()
            .unwrap_or_else(|| update.clone());

        self.truncate_history(nodeset, &owned, &current, &update).await;

        let hash = revision_hash(&update).unwrap_or_default().to_string();
        Ok(RevisionState {
            current,
            update,
            collision_count,
            hash,
        })
    }

    async fn truncate_history(
        &self,
        nodeset: &NodeSet,
        owned: &[ControllerRevision],
        current: &ControllerRevision,
        update: &ControllerRevision,
    ) {
        let namespace = nodeset.namespace().unwrap_or_default();
        let limit = usize::try_from(nodeset.spec.revision_history_limit).unwrap_or(0);
        let live = [current.name_any(), update.name_any()];
        let history: Vec<&ControllerRevision> = owned
            .iter()
            .filter(|revision| !live.contains(&revision.name_any()))
            .collect();

        if history.len() <= limit {
            return;
        }
        for revision in &history[..history.len() - limit] {
            let revision_name = revision.name_any();
            if let Err(e) = self.kube.delete_revision(&namespace, &revision_name).await {
                warn!("Failed to delete ControllerRevision {}/{}: {}", namespace, revision_name, e);
            }
        }
    }
}
