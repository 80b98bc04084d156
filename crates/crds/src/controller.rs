//! Controller CRD
//!
//! Describes one Slurm cluster reachable through slurmrestd. NodeSets point
//! at a Controller through `controllerRef`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::SecretKeyReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "hpc.microscaler.io",
    version = "v1alpha1",
    kind = "Controller",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    /// slurmrestd base URL (e.g. "http://slurm-restapi:6820")
    pub rest_api_url: String,

    /// Secret key holding the slurmrestd JWT
    pub token_secret_ref: SecretKeyReference,
}
