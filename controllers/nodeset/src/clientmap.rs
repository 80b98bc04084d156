//! Registry of slurmrestd clients, one per `Controller` resource.
//!
//! Keys are `namespace/name` of the `Controller`. Entries are added and
//! removed by the Controller watcher and resolved by the reconciler.

use crate::error::ControllerError;
use crate::kube_client::KubeClientTrait;
use crds::{Controller, controller_key};
use kube::ResourceExt;
use slurm_client::{SlurmClient, SlurmClientTrait};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Thread-safe map from controller key to Slurm client
#[derive(Default)]
pub struct ClientMap {
    clients: RwLock<HashMap<String, Arc<dyn SlurmClientTrait>>>,
}

impl std::fmt::Debug for ClientMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .clients
            .read()
            .map(|clients| clients.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ClientMap").field("clients", &keys).finish()
    }
}

impl ClientMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the client for `key`
    pub fn add(&self, key: impl Into<String>, client: Arc<dyn SlurmClientTrait>) {
        match self.clients.write() {
            Ok(mut clients) => {
                clients.insert(key.into(), client);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.into(), client);
            }
        }
    }

    /// Remove the client for `key`, returning whether one was registered
    pub fn remove(&self, key: &str) -> bool {
        match self.clients.write() {
            Ok(mut clients) => clients.remove(key).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(key).is_some(),
        }
    }

    /// Whether a client is registered for `key`
    #[cfg(test)]
    pub fn has(&self, key: &str) -> bool {
        self.resolve(key).is_ok()
    }

    /// Client registered for `key`
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn SlurmClientTrait>, ControllerError> {
        let clients = match self.clients.read() {
            Ok(clients) => clients,
            Err(poisoned) => poisoned.into_inner(),
        };
        clients
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::ClientNotFound(key.to_string()))
    }
}

/// Build a client for `controller` from its token Secret and register it
pub async fn register_controller(
    client_map: &ClientMap,
    kube: &dyn KubeClientTrait,
    controller: &Controller,
) -> Result<(), ControllerError> {
    let namespace = controller.namespace().unwrap_or_default();
    let name = controller.name_any();
    let key = controller_key(&namespace, &name);
    let secret_ref = &controller.spec.token_secret_ref;

    let token = kube
        .get_secret_value(&namespace, &secret_ref.name, &secret_ref.key)
        .await?;
    let client = SlurmClient::new(controller.spec.rest_api_url.clone(), token)?;

    if let Err(e) = client.ping().await {
        // Registered anyway; node sync reports the error on every pass
        warn!("slurmrestd for controller {} did not answer ping: {}", key, e);
    }

    info!("Registered Slurm client for controller {} at {}", key, controller.spec.rest_api_url);
    client_map.add(key, Arc::new(client));
    Ok(())
}

/// Drop the client registered for `controller`
pub fn unregister_controller(client_map: &ClientMap, controller: &Controller) {
    let key = controller_key(&controller.namespace().unwrap_or_default(), &controller.name_any());
    if client_map.remove(&key) {
        info!("Removed Slurm client for controller {}", key);
    }
}
