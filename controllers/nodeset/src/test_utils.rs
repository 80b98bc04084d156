//! Test utilities for unit testing reconcilers
//!
//! This module provides an in-memory Kubernetes API fake and helpers for
//! creating test data.

use crate::clientmap::ClientMap;
use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use crate::labels::{REVISION_LABEL, selector_labels};
use crate::reconciler::Reconciler;
use crate::time::to_k8s_time;
use chrono::{DateTime, Utc};
use crds::*;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use slurm_client::MockSlurmClient;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Namespace used by all test objects
pub const TEST_NAMESPACE: &str = "default";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn parse_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Default)]
struct MockState {
    pods: BTreeMap<Key, Pod>,
    nodesets: BTreeMap<Key, NodeSet>,
    revisions: BTreeMap<Key, ControllerRevision>,
    secrets: BTreeMap<Key, BTreeMap<String, String>>,
    next_resource_version: u64,
    pod_condition_writes: usize,
    status_writes: usize,
    conflict_on_pod_conditions: bool,
    created_pods: Vec<String>,
    deleted_pods: Vec<String>,
    deleted_revisions: Vec<String>,
}

impl MockState {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// In-memory Kubernetes API with resourceVersion preconditions
#[derive(Clone, Default)]
pub struct MockKubeClient {
    state: Arc<Mutex<MockState>>,
}

impl MockKubeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, mut pod: Pod) -> Pod {
        let mut state = self.state.lock().unwrap();
        pod.metadata.resource_version = Some(state.bump());
        let ns = pod.namespace().unwrap_or_else(|| TEST_NAMESPACE.to_string());
        state.pods.insert(key(&ns, &pod.name_any()), pod.clone());
        pod
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.state.lock().unwrap().pods.remove(&key(namespace, name));
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(&key(namespace, name)).cloned()
    }

    /// All stored pods, ordered by namespace and name
    pub fn pods(&self) -> Vec<Pod> {
        self.state.lock().unwrap().pods.values().cloned().collect()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods().iter().map(ResourceExt::name_any).collect()
    }

    /// Replace a stored pod, as the kubelet would when updating status
    pub fn update_pod(&self, pod: Pod) {
        self.add_pod(pod);
    }

    pub fn add_nodeset(&self, mut nodeset: NodeSet) -> NodeSet {
        let mut state = self.state.lock().unwrap();
        nodeset.metadata.resource_version = Some(state.bump());
        state
            .nodesets
            .insert(key(TEST_NAMESPACE, &nodeset.name_any()), nodeset.clone());
        nodeset
    }

    pub fn nodeset(&self, name: &str) -> Option<NodeSet> {
        self.state.lock().unwrap().nodesets.get(&key(TEST_NAMESPACE, name)).cloned()
    }

    /// Replace the stored NodeSet's spec, as `kubectl apply` would.
    ///
    /// The status is kept; resourceVersion and generation are bumped.
    pub fn update_nodeset_spec(&self, name: &str, spec: NodeSetSpec) -> NodeSet {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let stored = state.nodesets.get_mut(&key(TEST_NAMESPACE, name)).unwrap();
        stored.spec = spec;
        stored.metadata.resource_version = Some(version);
        stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
        stored.clone()
    }

    pub fn add_secret(&self, namespace: &str, name: &str, data_key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .entry(key(namespace, name))
            .or_default()
            .insert(data_key.to_string(), value.to_string());
    }

    pub fn add_revision(&self, revision: ControllerRevision) {
        let ns = revision.namespace().unwrap_or_else(|| TEST_NAMESPACE.to_string());
        self.state
            .lock()
            .unwrap()
            .revisions
            .insert(key(&ns, &revision.name_any()), revision);
    }

    pub fn revisions(&self) -> Vec<ControllerRevision> {
        self.state.lock().unwrap().revisions.values().cloned().collect()
    }

    pub fn pod_condition_writes(&self) -> usize {
        self.state.lock().unwrap().pod_condition_writes
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    pub fn created_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().created_pods.clone()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    pub fn deleted_revisions(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_revisions.clone()
    }

    pub fn fail_pod_condition_writes_with_conflict(&self, fail: bool) {
        self.state.lock().unwrap().conflict_on_pod_conditions = fail;
    }
}

#[async_trait::async_trait]
impl KubeClientTrait for MockKubeClient {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, ControllerError> {
        let selector = parse_selector(selector);
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace
                    && crate::labels::matches_selector(pod.metadata.labels.as_ref(), &selector)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ControllerError> {
        self.pod(namespace, name)
            .ok_or_else(|| ControllerError::NotFound(format!("pod {}/{}", namespace, name)))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let pod_key = key(namespace, &pod.name_any());
        if state.pods.contains_key(&pod_key) {
            return Err(ControllerError::Conflict(format!(
                "pod {}/{} already exists",
                namespace,
                pod.name_any()
            )));
        }
        let mut created = pod.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(state.bump());
        state.created_pods.push(pod.name_any());
        state.pods.insert(pod_key, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state
            .pods
            .remove(&key(namespace, name))
            .ok_or_else(|| ControllerError::NotFound(format!("pod {}/{}", namespace, name)))?;
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn update_pod_conditions(
        &self,
        pod: &Pod,
        conditions: &[PodCondition],
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        let namespace = pod.namespace().unwrap_or_else(|| TEST_NAMESPACE.to_string());
        let pod_key = key(&namespace, &pod.name_any());
        if state.conflict_on_pod_conditions {
            return Err(ControllerError::Conflict(format!("pod {}", pod.name_any())));
        }
        let version = state.bump();
        let stored = state
            .pods
            .get_mut(&pod_key)
            .ok_or_else(|| ControllerError::NotFound(format!("pod {}", pod.name_any())))?;
        if stored.metadata.resource_version != pod.metadata.resource_version {
            return Err(ControllerError::Conflict(format!("pod {}", pod.name_any())));
        }
        stored
            .status
            .get_or_insert_with(Default::default)
            .conditions = Some(conditions.to_vec());
        stored.metadata.resource_version = Some(version);
        state.pod_condition_writes += 1;
        Ok(())
    }

    async fn update_nodeset_status(
        &self,
        nodeset: &NodeSet,
        status: &NodeSetStatus,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let stored = state
            .nodesets
            .get_mut(&key(TEST_NAMESPACE, &nodeset.name_any()))
            .ok_or_else(|| ControllerError::NotFound(format!("nodeset {}", nodeset.name_any())))?;
        if stored.metadata.resource_version != nodeset.metadata.resource_version {
            return Err(ControllerError::Conflict(format!("nodeset {}", nodeset.name_any())));
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        state.status_writes += 1;
        Ok(())
    }

    async fn list_revisions(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ControllerRevision>, ControllerError> {
        let selector = parse_selector(selector);
        Ok(self
            .state
            .lock()
            .unwrap()
            .revisions
            .iter()
            .filter(|((ns, _), revision)| {
                ns == namespace
                    && crate::labels::matches_selector(revision.metadata.labels.as_ref(), &selector)
            })
            .map(|(_, revision)| revision.clone())
            .collect())
    }

    async fn create_revision(
        &self,
        namespace: &str,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let revision_key = key(namespace, &revision.name_any());
        if state.revisions.contains_key(&revision_key) {
            return Err(ControllerError::Conflict(format!(
                "controllerrevision {}",
                revision.name_any()
            )));
        }
        let mut created = revision.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(state.bump());
        state.revisions.insert(revision_key, created.clone());
        Ok(created)
    }

    async fn delete_revision(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state
            .revisions
            .remove(&key(namespace, name))
            .ok_or_else(|| ControllerError::NotFound(format!("controllerrevision {}", name)))?;
        state.deleted_revisions.push(name.to_string());
        Ok(())
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        data_key: &str,
    ) -> Result<String, ControllerError> {
        let state = self.state.lock().unwrap();
        let secret = state
            .secrets
            .get(&key(namespace, name))
            .ok_or_else(|| ControllerError::NotFound(format!("secret {}/{}", namespace, name)))?;
        secret.get(data_key).cloned().ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "secret {}/{} has no key {}",
                namespace, name, data_key
            ))
        })
    }
}

fn owner_reference(nodeset_name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "hpc.microscaler.io/v1alpha1".to_string(),
        kind: "NodeSet".to_string(),
        name: nodeset_name.to_string(),
        uid: format!("uid-{}", nodeset_name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Helper to create a NodeSet `name` in the test namespace referencing controller `slurm`
pub fn nodeset(name: &str, replicas: i32) -> NodeSet {
    let mut nodeset = NodeSet::new(
        name,
        NodeSetSpec {
            controller_ref: ControllerReference::new("slurm"),
            replicas: Some(replicas),
            revision_history_limit: DEFAULT_REVISION_HISTORY_LIMIT,
            ..Default::default()
        },
    );
    nodeset.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    nodeset.metadata.uid = Some(format!("uid-{}", name));
    nodeset.metadata.generation = Some(1);
    nodeset
}

/// Helper to create a worker pod owned by the NodeSet its name derives from
pub fn pod(name: &str, node: Option<&str>, phase: &str) -> Pod {
    let nodeset_name = name.rsplit_once('-').map_or(name, |(prefix, _)| prefix);
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(selector_labels(nodeset_name)),
            owner_references: Some(vec![owner_reference(nodeset_name)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// Helper to create a Running pod that became Ready at `ready_since`
pub fn ready_pod(name: &str, node: &str, ready_since: DateTime<Utc>) -> Pod {
    let mut pod = pod(name, Some(node), "Running");
    pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
        type_: "Ready".to_string(),
        status: "True".to_string(),
        last_transition_time: Some(to_k8s_time(ready_since).unwrap()),
        ..Default::default()
    }]);
    pod
}

/// Helper to label a pod with a revision hash
pub fn with_revision(mut pod: Pod, hash: &str) -> Pod {
    pod.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(REVISION_LABEL.to_string(), hash.to_string());
    pod
}

/// Helper to create a test Controller CRD
pub fn controller(
    namespace: &str,
    name: &str,
    url: &str,
    secret: &str,
    secret_key: &str,
) -> Controller {
    let mut controller = Controller::new(
        name,
        ControllerSpec {
            rest_api_url: url.to_string(),
            token_secret_ref: SecretKeyReference {
                name: secret.to_string(),
                key: secret_key.to_string(),
            },
        },
    );
    controller.metadata.namespace = Some(namespace.to_string());
    controller
}

/// Reconciler over `kube`, with `slurm` registered for controller `default/slurm`
pub fn reconciler_with(kube: &MockKubeClient, slurm: Option<MockSlurmClient>) -> Reconciler {
    let client_map = ClientMap::new();
    if let Some(slurm) = slurm {
        client_map.add(controller_key(TEST_NAMESPACE, "slurm"), Arc::new(slurm));
    }
    Reconciler::new(Arc::new(kube.clone()), Arc::new(client_map))
}
