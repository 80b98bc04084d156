//! Main controller implementation.
//!
//! Wires the Kubernetes client, the Slurm client map and the reconciler
//! together and runs the NodeSet and `Controller` watchers.

use crate::clientmap::ClientMap;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::kube_client::RealKubeClient;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{Controller as SlurmController, NodeSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Main controller for NodeSet management.
#[derive(Debug)]
pub struct NodeSetController {
    nodeset_watcher: JoinHandle<Result<(), ControllerError>>,
    controller_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl NodeSetController {
    /// Connects to the cluster and starts the watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing NodeSet Controller");

        let kube_client = Client::try_default().await?;

        let namespace = config.namespace.as_deref();
        let nodeset_api: Api<NodeSet> = scoped_api(kube_client.clone(), namespace);
        let pod_api: Api<Pod> = scoped_api(kube_client.clone(), namespace);
        let controller_api: Api<SlurmController> = scoped_api(kube_client.clone(), namespace);

        let client_map = Arc::new(ClientMap::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(RealKubeClient::new(kube_client)),
            client_map,
        ));

        let watcher = Arc::new(Watcher::new(
            reconciler,
            config,
            nodeset_api,
            pod_api,
            controller_api,
        ));

        let controller_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_controllers().await })
        };
        let nodeset_watcher = tokio::spawn(async move { watcher.watch_nodesets().await });

        Ok(Self {
            nodeset_watcher,
            controller_watcher,
        })
    }

    /// Runs the controller until either watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("NodeSet Controller running");

        tokio::select! {
            result = &mut self.nodeset_watcher => {
                result.map_err(|e| {
                    ControllerError::Watch(format!("NodeSet watcher panicked: {}", e))
                })??;
            }
            result = &mut self.controller_watcher => {
                result.map_err(|e| {
                    ControllerError::Watch(format!("Controller watcher panicked: {}", e))
                })??;
            }
        }

        Ok(())
    }
}
