//! Reconciliation logic for NodeSets.
//!
//! One pass runs these phases in order:
//! - `revision`: ensure the update ControllerRevision exists
//! - `pods`: create, delete and roll worker pods
//! - `status`: compute node pins (`node_assignments`), mirror Slurm node
//!   state onto pods (`slurm_sync`), count replicas (`replica_status`) and
//!   persist the merged status

pub mod node_assignments;
pub mod pods;
pub mod replica_status;
pub mod revision;
pub mod slurm_sync;
pub mod status;

use crate::backoff::FibonacciBackoff;
use crate::clientmap::ClientMap;
use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use crate::labels::{selector_labels, selector_string};
use crate::webhook::default_nodeset;
use crds::NodeSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use revision::owned_by;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }
}

/// Reconciles NodeSet resources.
pub struct Reconciler {
    pub(crate) kube: Arc<dyn KubeClientTrait>,
    pub(crate) client_map: Arc<ClientMap>,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("client_map", &self.client_map)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(kube: Arc<dyn KubeClientTrait>, client_map: Arc<ClientMap>) -> Self {
        Self {
            kube,
            client_map,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile one NodeSet.
    ///
    /// Pod and Slurm failures do not stop the pass; they are returned after
    /// the status has been written so the NodeSet is retried.
    pub async fn reconcile_nodeset(&self, nodeset: &NodeSet) -> Result<(), ControllerError> {
        let mut nodeset = nodeset.clone();
        default_nodeset(&mut nodeset);

        let namespace = nodeset.namespace().unwrap_or_default();
        let name = nodeset.name_any();

        if nodeset.metadata.deletion_timestamp.is_some() {
            debug!("NodeSet {}/{} is being deleted, skipping", namespace, name);
            return Ok(());
        }

        info!(
            "Reconciling NodeSet {}/{} (replicas={}, lockNodes={})",
            namespace,
            name,
            nodeset.desired_replicas(),
            nodeset.spec.lock_nodes
        );

        let revisions = self.sync_revisions(&nodeset).await?;

        let pods = self.list_owned_pods(&nodeset).await?;
        let pod_sync = self.sync_pods(&nodeset, &pods, &revisions).await;
        let pods = if pod_sync.changed {
            self.list_owned_pods(&nodeset).await?
        } else {
            pods
        };

        self.sync_status(&nodeset, &pods, &revisions, pod_sync.errors).await
    }

    /// Pods matching the NodeSet selector and controlled by it
    async fn list_owned_pods(&self, nodeset: &NodeSet) -> Result<Vec<Pod>, ControllerError> {
        let namespace = nodeset.namespace().unwrap_or_default();
        let selector = selector_string(&selector_labels(&nodeset.name_any()));
        let uid = nodeset.metadata.uid.as_deref();
        Ok(self
            .kube
            .list_pods(&namespace, &selector)
            .await?
            .into_iter()
            .filter(|pod| owned_by(&pod.metadata, uid))
            .collect())
    }

    /// Next retry delay for `key`, advancing its backoff
    pub fn next_backoff(&self, key: &str) -> Duration {
        let mut states = match self.backoff_states.lock() {
            Ok(states) => states,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        let delay = state.backoff.next_backoff();
        debug!("Backoff for {} after {} errors: {:?}", key, state.error_count, delay);
        delay
    }

    /// Forget the backoff state of `key` after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        let mut states = match self.backoff_states.lock() {
            Ok(states) => states,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.remove(key);
    }
}
