//! Controller-specific error types.
//!
//! Errors raised while reconciling NodeSets. Per-pod failures are collected
//! into [`ControllerError::Aggregate`] so a pass can finish before reporting.

use kube::Error as KubeError;
use slurm_client::SlurmError;
use thiserror::Error;

/// Errors that can occur in the NodeSet Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// slurmrestd API error
    #[error("Slurm error: {0}")]
    Slurm(#[from] SlurmError),

    /// Kubernetes object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict or object already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No Slurm client registered for a controller reference
    #[error("No Slurm client registered for controller {0}")]
    ClientNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Several independent failures from one pass
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Fold a list of errors into one result.
    ///
    /// No errors is `Ok`, a single error is returned as-is, several become
    /// an `Aggregate`. Nested aggregates are flattened.
    pub fn aggregate(errors: Vec<ControllerError>) -> Result<(), ControllerError> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                ControllerError::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(ControllerError::Aggregate(flat)),
        }
    }

    /// True for conflicts, including a conflict anywhere in an aggregate
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(response)) => response.code == 409,
            ControllerError::Aggregate(errors) => errors.iter().any(ControllerError::is_conflict),
            _ => false,
        }
    }

    /// True when the error means the object no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            ControllerError::NotFound(_) => true,
            ControllerError::Kube(KubeError::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Map a kube error, turning 404 and 409 into `NotFound` and `Conflict`
    pub fn from_kube(error: KubeError, what: impl Into<String>) -> Self {
        match &error {
            KubeError::Api(response) if response.code == 404 => {
                ControllerError::NotFound(what.into())
            }
            KubeError::Api(response) if response.code == 409 => {
                ControllerError::Conflict(format!("{}: {}", what.into(), response.message))
            }
            _ => ControllerError::Kube(error),
        }
    }
}
