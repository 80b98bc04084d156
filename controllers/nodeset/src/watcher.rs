//! Kubernetes resource watchers.
//!
//! NodeSets run through a `kube_runtime::Controller` that also watches the
//! pods they own, so pod phase and readiness changes trigger a pass on the
//! parent NodeSet. NodeSet events are filtered on `metadata.generation`: the
//! controller's own status writes do not start another pass, and the resync
//! requeue picks up anything else. `Controller` resources are followed with a
//! plain watch stream that keeps the Slurm client map up to date.

use crate::clientmap::{register_controller, unregister_controller};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Controller as SlurmController, NodeSet};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue delay after an optimistic concurrency conflict
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

fn object_key(nodeset: &NodeSet) -> String {
    format!("{}/{}", nodeset.namespace().unwrap_or_default(), nodeset.name_any())
}

async fn reconcile(
    nodeset: Arc<NodeSet>,
    ctx: Arc<WatchContext>,
) -> Result<Action, ControllerError> {
    let key = object_key(&nodeset);
    debug!("Reconciling NodeSet {}", key);

    ctx.reconciler.reconcile_nodeset(&nodeset).await?;
    ctx.reconciler.reset_backoff(&key);
    Ok(Action::requeue(ctx.resync_interval))
}

fn error_policy(nodeset: Arc<NodeSet>, err: &ControllerError, ctx: Arc<WatchContext>) -> Action {
    let key = object_key(&nodeset);
    if err.is_conflict() {
        debug!("Conflict while reconciling NodeSet {}, retrying: {}", key, err);
        return Action::requeue(CONFLICT_REQUEUE);
    }

    let delay = ctx.reconciler.next_backoff(&key);
    error!("Reconciliation of NodeSet {} failed, retrying in {:?}: {}", key, delay, err);
    Action::requeue(delay)
}

/// State shared by the NodeSet reconcile callbacks
#[derive(Debug)]
struct WatchContext {
    reconciler: Arc<Reconciler>,
    resync_interval: Duration,
}

/// Watches NodeSets, their pods and Slurm `Controller` resources.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
    nodeset_api: Api<NodeSet>,
    pod_api: Api<Pod>,
    controller_api: Api<SlurmController>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        config: ControllerConfig,
        nodeset_api: Api<NodeSet>,
        pod_api: Api<Pod>,
        controller_api: Api<SlurmController>,
    ) -> Self {
        Self {
            reconciler,
            config,
            nodeset_api,
            pod_api,
            controller_api,
        }
    }

    /// Runs the NodeSet controller loop until the watch ends.
    pub async fn watch_nodesets(&self) -> Result<(), ControllerError> {
        info!(
            "Starting NodeSet watcher (concurrency={}, debounce={:?}, resync={:?})",
            self.config.concurrency, self.config.debounce, self.config.resync_interval
        );

        let ctx = Arc::new(WatchContext {
            reconciler: self.reconciler.clone(),
            resync_interval: self.config.resync_interval,
        });
        let runtime_config = RuntimeConfig::default()
            .debounce(self.config.debounce)
            .concurrency(self.config.concurrency);

        let (reader, writer) = reflector::store();
        let nodesets = watcher(self.nodeset_api.clone(), watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects()
            .predicate_filter(predicates::generation);

        Controller::for_stream(nodesets, reader)
            .owns(self.pod_api.clone(), watcher::Config::default())
            .with_config(runtime_config)
            .run(reconcile, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled NodeSet {:?}", obj.name),
                    Err(e) => warn!("NodeSet controller error: {}", e),
                }
            })
            .await;

        info!("NodeSet watcher stopped");
        Ok(())
    }

    /// Keeps the Slurm client map in step with `Controller` resources.
    pub async fn watch_controllers(&self) -> Result<(), ControllerError> {
        info!("Starting Controller watcher");

        let mut stream = Box::pin(
            watcher(self.controller_api.clone(), watcher::Config::default()).default_backoff(),
        );

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(controller) | watcher::Event::InitApply(controller)) => {
                    let client_map = &self.reconciler.client_map;
                    let kube = self.reconciler.kube.as_ref();
                    if let Err(e) = register_controller(client_map, kube, &controller).await {
                        error!(
                            "Failed to register Slurm client for controller {}/{}: {}",
                            controller.namespace().unwrap_or_default(),
                            controller.name_any(),
                            e
                        );
                    }
                }
                Ok(watcher::Event::Delete(controller)) => {
                    unregister_controller(&self.reconciler.client_map, &controller);
                }
                Ok(watcher::Event::Init) => {
                    debug!("Controller watcher initializing");
                }
                Ok(watcher::Event::InitDone) => {
                    info!("Controller watcher initialization complete");
                }
                Err(e) => {
                    warn!("Controller watch stream error: {}", e);
                }
            }
        }

        Err(ControllerError::Watch("Controller watch stream ended".to_string()))
    }
}
