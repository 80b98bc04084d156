//! Mirrors Slurm node state onto NodeSet pod conditions.
//!
//! Each worker pod registers with slurmctld under its own name, so the Slurm
//! node for a pod is the node of the same name. The pass resolves the Slurm
//! client of the NodeSet's controller, lists nodes once and rewrites the
//! `SlurmNodeState*` conditions of every pod Slurm knows about.

use super::Reconciler;
use crate::conditions::{merge_slurm_conditions, node_conditions, slurm_condition_type};
use crate::error::ControllerError;
use crate::pod_state::{pod_conditions, pod_name};
use crate::time::to_k8s_time;
use chrono::{DateTime, Utc};
use crds::NodeSet;
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use kube::ResourceExt;
use slurm_client::{Node, NodeState};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Desired Slurm conditions keyed by pod name
pub type NodeStates = BTreeMap<String, Vec<PodCondition>>;

/// Outcome of a synchronizer pass
#[derive(Debug, Default)]
pub struct SlurmSync {
    /// Slurm conditions per pod, `None` when Slurm could not be queried
    pub node_states: Option<NodeStates>,
    /// Failures collected during the pass
    pub errors: Vec<ControllerError>,
}

/// Pods per Slurm state, derived from node states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlurmCounts {
    pub idle: i32,
    pub allocated: i32,
    pub down: i32,
    pub drain: i32,
}

impl SlurmCounts {
    /// Count pods carrying each Slurm state condition
    pub fn from_node_states(node_states: &NodeStates) -> Self {
        let idle = slurm_condition_type(NodeState::Idle);
        let allocated = slurm_condition_type(NodeState::Allocated);
        let mixed = slurm_condition_type(NodeState::Mixed);
        let down = slurm_condition_type(NodeState::Down);
        let drain = slurm_condition_type(NodeState::Drain);

        let mut counts = Self::default();
        for conditions in node_states.values() {
            let has = |wanted: &str| {
                conditions
                    .iter()
                    .any(|c| c.type_ == wanted && c.status == "True")
            };
            if has(&idle) {
                counts.idle += 1;
            }
            if has(&allocated) || has(&mixed) {
                counts.allocated += 1;
            }
            if has(&down) {
                counts.down += 1;
            }
            if has(&drain) {
                counts.drain += 1;
            }
        }
        counts
    }
}

/// Desired Slurm conditions for every pod that has a Slurm node
pub fn node_states_for_pods(
    nodes: &[Node],
    pods: &[Pod],
    now: DateTime<Utc>,
) -> Result<NodeStates, ControllerError> {
    let now = to_k8s_time(now)?;
    let by_name: HashMap<&str, &Node> =
        nodes.iter().map(|node| (node.name.as_str(), node)).collect();

    Ok(pods
        .iter()
        .filter_map(|pod| {
            let name = pod_name(pod);
            by_name
                .get(name)
                .map(|node| (name.to_string(), node_conditions(node, &now)))
        })
        .collect())
}

impl Reconciler {
    /// Query Slurm for the NodeSet's nodes and mirror their state onto pods.
    ///
    /// Never fails outright: a missing client or an unreachable slurmrestd
    /// yields no node states, and per-pod write failures are collected.
    pub async fn sync_slurm_status(
        &self,
        nodeset: &NodeSet,
        pods: &[Pod],
        now: DateTime<Utc>,
    ) -> SlurmSync {
        let namespace = nodeset.namespace().unwrap_or_default();
        let key = nodeset.spec.controller_ref.key(&namespace);

        let client = match self.client_map.resolve(&key) {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    "Skipping Slurm sync for NodeSet {}/{}: {}",
                    namespace,
                    nodeset.name_any(),
                    e
                );
                return SlurmSync { node_states: None, errors: vec![e] };
            }
        };

        let nodes = match client.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Failed to list Slurm nodes from {}: {}", client.base_url(), e);
                return SlurmSync { node_states: None, errors: vec![e.into()] };
            }
        };

        let node_states = match node_states_for_pods(&nodes, pods, now) {
            Ok(node_states) => node_states,
            Err(e) => return SlurmSync { node_states: None, errors: vec![e] },
        };

        let errors = self.update_nodeset_pod_conditions(pods, &node_states).await;
        SlurmSync {
            node_states: Some(node_states),
            errors,
        }
    }

    /// Rewrite Slurm conditions of each pod listed in `node_states`.
    ///
    /// Pods are re-read before writing and written only when their
    /// conditions change. Every pod is attempted; failures are returned.
    pub async fn update_nodeset_pod_conditions(
        &self,
        pods: &[Pod],
        node_states: &NodeStates,
    ) -> Vec<ControllerError> {
        let updates = pods.iter().filter_map(|pod| {
            let desired = node_states.get(pod_name(pod))?;
            let namespace = pod.namespace().unwrap_or_default();
            Some(self.update_pod_slurm_conditions(namespace, pod.name_any(), desired))
        });

        join_all(updates)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    async fn update_pod_slurm_conditions(
        &self,
        namespace: String,
        name: String,
        desired: &[PodCondition],
    ) -> Result<(), ControllerError> {
        let pod = self.kube.get_pod(&namespace, &name).await?;
        let existing = pod_conditions(&pod);
        let merged = merge_slurm_conditions(existing, desired);

        if merged.as_slice() == existing {
            debug!("Pod {}/{} Slurm conditions unchanged", namespace, name);
            return Ok(());
        }

        debug!("Updating Slurm conditions of pod {}/{}", namespace, name);
        self.kube.update_pod_conditions(&pod, &merged).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockKubeClient, nodeset, pod, ready_pod, reconciler_with};
    use chrono::TimeZone;
    use slurm_client::MockSlurmClient;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn slurm_with(nodes: Vec<Node>) -> MockSlurmClient {
        let slurm = MockSlurmClient::new("http://mock-slurm");
        for node in nodes {
            slurm.add_node(node);
        }
        slurm
    }

    fn types(pod: &Pod) -> Vec<String> {
        pod_conditions(pod).iter().map(|c| c.type_.clone()).collect()
    }

    #[test]
    fn test_counts_by_state() {
        let pods = vec![
            pod("foo-0", Some("node-1"), "Running"),
            pod("foo-1", Some("node-2"), "Running"),
            pod("foo-2", Some("node-3"), "Running"),
            pod("foo-3", Some("node-4"), "Running"),
        ];
        let nodes = vec![
            Node::new("foo-0", vec![NodeState::Idle]),
            Node::new("foo-1", vec![NodeState::Mixed]),
            Node::new("foo-2", vec![NodeState::Idle, NodeState::Drain]),
            Node::new("foo-3", vec![NodeState::Down]),
            Node::new("other-0", vec![NodeState::Idle]),
        ];

        let states = node_states_for_pods(&nodes, &pods, now()).unwrap();

        assert_eq!(states.len(), 4);
        assert_eq!(
            SlurmCounts::from_node_states(&states),
            SlurmCounts { idle: 2, allocated: 1, down: 1, drain: 1 }
        );
    }

    #[tokio::test]
    async fn test_sync_writes_conditions_once() {
        let kube = MockKubeClient::new();
        kube.add_pod(pod("foo-0", Some("node-1"), "Running"));
        kube.add_pod(pod("foo-1", Some("node-2"), "Running"));
        let slurm = slurm_with(vec![Node::new("foo-0", vec![NodeState::Idle])]);
        let reconciler = reconciler_with(&kube, Some(slurm));
        let nodeset = nodeset("foo", 2);
        let pods = kube.pods();

        let sync = reconciler.sync_slurm_status(&nodeset, &pods, now()).await;
        assert!(sync.errors.is_empty());
        assert_eq!(kube.pod_condition_writes(), 1);

        let updated = kube.pod("default", "foo-0").unwrap();
        assert!(types(&updated).contains(&"SlurmNodeStateIdle".to_string()));
        let foo_1 = kube.pod("default", "foo-1").unwrap();
        assert!(types(&foo_1).iter().all(|t| !t.starts_with("SlurmNodeState")));

        // Second pass with the same Slurm state writes nothing
        let later = now() + chrono::Duration::seconds(30);
        let sync = reconciler.sync_slurm_status(&nodeset, &kube.pods(), later).await;
        assert!(sync.errors.is_empty());
        assert_eq!(kube.pod_condition_writes(), 1);
    }

    #[tokio::test]
    async fn test_sync_replaces_stale_state() {
        let kube = MockKubeClient::new();
        kube.add_pod(ready_pod("foo-0", "node-1", now()));
        let slurm = slurm_with(vec![Node::new("foo-0", vec![NodeState::Idle])]);
        let reconciler = reconciler_with(&kube, Some(slurm.clone()));
        let nodeset = nodeset("foo", 1);

        reconciler.sync_slurm_status(&nodeset, &kube.pods(), now()).await;
        slurm.add_node(Node::new("foo-0", vec![NodeState::Allocated]));
        reconciler.sync_slurm_status(&nodeset, &kube.pods(), now()).await;

        let types = types(&kube.pod("default", "foo-0").unwrap());
        assert!(types.contains(&"SlurmNodeStateAllocated".to_string()));
        assert!(!types.contains(&"SlurmNodeStateIdle".to_string()));
        assert!(types.contains(&"Ready".to_string()));
    }

    #[tokio::test]
    async fn test_sync_continues_past_failed_pod() {
        let kube = MockKubeClient::new();
        kube.add_pod(pod("foo-0", Some("node-1"), "Running"));
        kube.add_pod(pod("foo-1", Some("node-2"), "Running"));
        let pods = kube.pods();
        // foo-0 disappears between list and update
        kube.remove_pod("default", "foo-0");
        let slurm = slurm_with(vec![
            Node::new("foo-0", vec![NodeState::Idle]),
            Node::new("foo-1", vec![NodeState::Idle]),
        ]);
        let reconciler = reconciler_with(&kube, Some(slurm));

        let sync = reconciler.sync_slurm_status(&nodeset("foo", 2), &pods, now()).await;

        assert_eq!(sync.errors.len(), 1);
        assert!(sync.errors[0].is_not_found());
        assert_eq!(sync.node_states.map(|s| s.len()), Some(2));
        let foo_1 = kube.pod("default", "foo-1").unwrap();
        assert!(types(&foo_1).contains(&"SlurmNodeStateIdle".to_string()));
    }

    #[tokio::test]
    async fn test_sync_without_client_is_soft_error() {
        let kube = MockKubeClient::new();
        kube.add_pod(pod("foo-0", Some("node-1"), "Running"));
        let reconciler = reconciler_with(&kube, None);

        let sync = reconciler.sync_slurm_status(&nodeset("foo", 1), &kube.pods(), now()).await;

        assert!(sync.node_states.is_none());
        assert!(matches!(sync.errors.as_slice(), [ControllerError::ClientNotFound(_)]));
        assert_eq!(kube.pod_condition_writes(), 0);
    }

    #[tokio::test]
    async fn test_sync_with_unreachable_slurm() {
        let kube = MockKubeClient::new();
        kube.add_pod(pod("foo-0", Some("node-1"), "Running"));
        let slurm = MockSlurmClient::new("http://mock-slurm");
        slurm.set_list_error(Some("slurmctld not responding"));
        let reconciler = reconciler_with(&kube, Some(slurm));

        let sync = reconciler.sync_slurm_status(&nodeset("foo", 1), &kube.pods(), now()).await;

        assert!(sync.node_states.is_none());
        assert!(matches!(sync.errors.as_slice(), [ControllerError::Slurm(_)]));
        assert_eq!(kube.pod_condition_writes(), 0);
    }

    #[tokio::test]
    async fn test_sync_conflict_is_recorded() {
        let kube = MockKubeClient::new();
        kube.add_pod(pod("foo-0", Some("node-1"), "Running"));
        kube.fail_pod_condition_writes_with_conflict(true);
        let slurm = slurm_with(vec![Node::new("foo-0", vec![NodeState::Drain])]);
        let reconciler = reconciler_with(&kube, Some(slurm));

        let sync = reconciler.sync_slurm_status(&nodeset("foo", 1), &kube.pods(), now()).await;

        assert_eq!(sync.errors.len(), 1);
        assert!(sync.errors[0].is_conflict());
    }
}
