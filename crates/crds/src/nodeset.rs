//! NodeSet CRD
//!
//! Declarative, ordinal-indexed fleet of `slurmd` worker pods. Each pod is a
//! compute node of the Slurm cluster referenced by `controllerRef`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::ControllerReference;

/// Default number of ControllerRevisions kept for a NodeSet
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "hpc.microscaler.io",
    version = "v1alpha1",
    kind = "NodeSet",
    namespaced,
    shortname = "nss",
    status = "NodeSetStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetSpec {
    /// Slurm cluster the worker pods register with
    pub controller_ref: ControllerReference,

    /// Desired number of worker pods (admission defaults unset to 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Pod template for worker pods
    #[serde(default)]
    pub template: PodTemplate,

    /// Overrides merged into the generated `slurmd` container
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub slurmd: Container,

    /// Extra node configuration passed to `slurmd --conf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_conf: Option<String>,

    /// Pin each pod name to the first Kubernetes node it was bound to
    #[serde(default)]
    pub lock_nodes: bool,

    /// Seconds an idle pin survives; 0 keeps pins forever
    #[serde(default)]
    pub lock_node_lifetime: i32,

    /// Seconds a ready pod must stay ready before it counts as available
    #[serde(default)]
    pub min_ready_seconds: i32,

    /// Number of old ControllerRevisions to retain
    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: i32,
}

fn default_revision_history_limit() -> i32 {
    DEFAULT_REVISION_HISTORY_LIMIT
}

/// Worker pod template
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    /// Extra labels added to every worker pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations added to every worker pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Pod spec merged under the generated worker spec
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub spec: PodSpec,
}

/// Observed state of a NodeSet.
///
/// Every field is always serialized so that a merge patch of the whole status
/// overwrites (or clears) what is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetStatus {
    /// Number of pods owned by the NodeSet
    #[serde(default)]
    pub replicas: i32,

    /// Pods running with a Ready condition
    #[serde(default)]
    pub ready_replicas: i32,

    /// Ready pods that have been ready for at least `minReadySeconds`
    #[serde(default)]
    pub available_replicas: i32,

    /// Pods created from the current revision
    #[serde(default)]
    pub current_replicas: i32,

    /// Pods created from the update revision
    #[serde(default)]
    pub updated_replicas: i32,

    /// `replicas - availableReplicas`
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Pods whose Slurm node is IDLE
    #[serde(default)]
    pub slurm_idle: i32,

    /// Pods whose Slurm node is ALLOCATED or MIXED
    #[serde(default)]
    pub slurm_allocated: i32,

    /// Pods whose Slurm node is DOWN
    #[serde(default)]
    pub slurm_down: i32,

    /// Pods whose Slurm node is draining or drained
    #[serde(default)]
    pub slurm_drain: i32,

    /// Hash of the spec that produced the update revision
    #[serde(default)]
    pub node_set_hash: String,

    /// Revision hash the current replicas were created from
    #[serde(default)]
    pub current_revision: Option<String>,

    /// Revision hash new replicas are created from
    #[serde(default)]
    pub update_revision: Option<String>,

    /// Count of hash collisions, mixed into the revision hash
    #[serde(default)]
    pub collision_count: Option<i32>,

    /// Label selector (string form) matching the NodeSet's pods
    #[serde(default)]
    pub selector: String,

    /// Pod name to pinned node; absent when node locking is off or nothing is pinned
    #[serde(default)]
    pub node_assignments: Option<BTreeMap<String, NodeAssignment>>,

    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// A pod name pinned to a Kubernetes node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAssignment {
    /// Kubernetes node the pod name is pinned to
    pub node_name: String,

    /// Last time the pin was created or confirmed by a running pod
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
}

impl NodeAssignment {
    /// Create an assignment stamped at `assigned_at`
    pub fn new(node_name: impl Into<String>, assigned_at: DateTime<Utc>) -> Self {
        Self {
            node_name: node_name.into(),
            assigned_at: Some(assigned_at),
        }
    }
}

impl NodeSet {
    /// Desired replica count, treating unset as 0
    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
