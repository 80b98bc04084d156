//! Kubernetes API access used by the reconciler.
//!
//! The reconciler talks to the API server only through [`KubeClientTrait`] so
//! reconcile passes can run against an in-memory fake in tests. The real
//! implementation maps 404 and 409 responses to `NotFound` and `Conflict`.

use crate::error::ControllerError;
use crds::{NodeSet, NodeSetStatus};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{Pod, PodCondition, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Kubernetes operations needed to reconcile a NodeSet
#[async_trait::async_trait]
pub trait KubeClientTrait: Send + Sync {
    /// List pods in `namespace` matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ControllerError>;

    /// Get a pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ControllerError>;

    /// Create a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError>;

    /// Delete a pod by name
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Replace the pod's status conditions, conditioned on the pod's resourceVersion
    async fn update_pod_conditions(
        &self,
        pod: &Pod,
        conditions: &[PodCondition],
    ) -> Result<(), ControllerError>;

    /// Write the NodeSet status, conditioned on the NodeSet's resourceVersion
    async fn update_nodeset_status(
        &self,
        nodeset: &NodeSet,
        status: &NodeSetStatus,
    ) -> Result<(), ControllerError>;

    /// List ControllerRevisions in `namespace` matching a label selector
    async fn list_revisions(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ControllerRevision>, ControllerError>;

    /// Create a ControllerRevision
    async fn create_revision(
        &self,
        namespace: &str,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, ControllerError>;

    /// Delete a ControllerRevision by name
    async fn delete_revision(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Read one key of a Secret as UTF-8
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, ControllerError>;
}

/// [`KubeClientTrait`] backed by a live `kube::Client`
#[derive(Clone)]
pub struct RealKubeClient {
    client: Client,
}

impl std::fmt::Debug for RealKubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealKubeClient").finish_non_exhaustive()
    }
}

impl RealKubeClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn revisions(&self, namespace: &str) -> Api<ControllerRevision> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Merge patch that only applies if the stored object is still at `resource_version`
fn versioned_patch(
    resource_version: Option<String>,
    status: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

#[async_trait::async_trait]
impl KubeClientTrait for RealKubeClient {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, ControllerError> {
        let lp = ListParams::default().labels(selector);
        let pods = self.pods(namespace).list(&lp).await.map_err(|e| {
            ControllerError::from_kube(e, format!("pods {}/{{{}}}", namespace, selector))
        })?;
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ControllerError> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| ControllerError::from_kube(e, format!("pod {}/{}", namespace, name)))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError> {
        let name = pod.name_any();
        debug!("Creating pod {}/{}", namespace, name);
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| ControllerError::from_kube(e, format!("pod {}/{}", namespace, name)))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        debug!("Deleting pod {}/{}", namespace, name);
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ControllerError::from_kube(e, format!("pod {}/{}", namespace, name)))
    }

    async fn update_pod_conditions(
        &self,
        pod: &Pod,
        conditions: &[PodCondition],
    ) -> Result<(), ControllerError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let patch = versioned_patch(
            pod.resource_version(),
            serde_json::json!({ "conditions": conditions }),
        );
        self.pods(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| ControllerError::from_kube(e, format!("pod {}/{}", namespace, name)))
    }

    async fn update_nodeset_status(
        &self,
        nodeset: &NodeSet,
        status: &NodeSetStatus,
    ) -> Result<(), ControllerError> {
        let namespace = nodeset.namespace().unwrap_or_default();
        let name = nodeset.name_any();
        let api: Api<NodeSet> = Api::namespaced(self.client.clone(), &namespace);
        let patch = versioned_patch(nodeset.resource_version(), serde_json::to_value(status)?);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| ControllerError::from_kube(e, format!("nodeset {}/{}", namespace, name)))
    }

    async fn list_revisions(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ControllerRevision>, ControllerError> {
        let lp = ListParams::default().labels(selector);
        let revisions = self.revisions(namespace).list(&lp).await.map_err(|e| {
            ControllerError::from_kube(
                e,
                format!("controllerrevisions {}/{{{}}}", namespace, selector),
            )
        })?;
        Ok(revisions.items)
    }

    async fn create_revision(
        &self,
        namespace: &str,
        revision: &ControllerRevision,
    ) -> Result<ControllerRevision, ControllerError> {
        let name = revision.name_any();
        debug!("Creating controllerrevision {}/{}", namespace, name);
        self.revisions(namespace)
            .create(&PostParams::default(), revision)
            .await
            .map_err(|e| {
                ControllerError::from_kube(e, format!("controllerrevision {}/{}", namespace, name))
            })
    }

    async fn delete_revision(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        debug!("Deleting controllerrevision {}/{}", namespace, name);
        self.revisions(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| {
                ControllerError::from_kube(e, format!("controllerrevision {}/{}", namespace, name))
            })
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| ControllerError::from_kube(e, format!("secret {}/{}", namespace, name)))?;
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "secret {}/{} has no key {}",
                    namespace, name, key
                ))
            })?;
        String::from_utf8(bytes.0.clone()).map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "secret {}/{} key {} is not UTF-8",
                namespace, name, key
            ))
        })
    }
}
