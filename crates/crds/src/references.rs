//! Object references between NodeSet CRDs and their Slurm controller.
//!
//! Follows the Kubernetes `LocalObjectReference` pattern with an optional
//! namespace, defaulting to the namespace of the referencing resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a `Controller` resource describing a Slurm cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerReference {
    /// Name of the referenced Controller
    pub name: String,

    /// Namespace of the Controller (defaults to same namespace as the NodeSet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ControllerReference {
    /// Create a reference to a Controller in the same namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Namespace of the referenced Controller, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }

    /// Key used to look the controller up in a client registry (`namespace/name`)
    pub fn key(&self, default_namespace: &str) -> String {
        controller_key(self.namespace_or(default_namespace), &self.name)
    }
}

/// Reference to a single key inside a Secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    /// Name of the Secret (same namespace as the referencing resource)
    pub name: String,

    /// Key within the Secret's data
    pub key: String,
}

/// Build the registry key for a controller.
pub fn controller_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
