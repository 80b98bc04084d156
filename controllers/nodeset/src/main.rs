//! NodeSet Controller
//!
//! Runs Slurm worker pods for `NodeSet` resources: keeps the pod count and
//! revision in step with the spec, optionally pins pods to the Kubernetes
//! node they first ran on, and mirrors Slurm node state onto pod conditions
//! and the NodeSet status.

mod backoff;
mod builder;
mod clientmap;
mod conditions;
mod config;
mod controller;
mod error;
mod kube_client;
mod labels;
mod pod_state;
mod reconciler;
mod time;
mod watcher;
mod webhook;

#[cfg(test)]
mod test_utils;

use config::ControllerConfig;
use controller::NodeSetController;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting NodeSet Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Debounce: {:?}", config.debounce);

    let controller = NodeSetController::new(config).await?;
    controller.run().await?;

    Ok(())
}
