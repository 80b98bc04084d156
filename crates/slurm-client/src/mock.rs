//! Mock SlurmClient for unit testing
//!
//! In-memory implementation of `SlurmClientTrait` usable without a running
//! slurmrestd.

use crate::error::SlurmError;
use crate::models::Node;
use crate::slurm_trait::SlurmClientTrait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Mock SlurmClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockSlurmClient {
    base_url: String,
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    list_error: Arc<Mutex<Option<String>>>,
}

impl MockSlurmClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Add or replace a node (for test setup)
    pub fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().insert(node.name.clone(), node);
    }

    /// Remove a node (for test setup)
    pub fn remove_node(&self, name: &str) {
        self.nodes.lock().unwrap().remove(name);
    }

    /// Make `list_nodes` fail with an API error until cleared with `None`
    pub fn set_list_error(&self, message: Option<&str>) {
        *self.list_error.lock().unwrap() = message.map(str::to_string);
    }
}

#[async_trait::async_trait]
impl SlurmClientTrait for MockSlurmClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ping(&self) -> Result<(), SlurmError> {
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, SlurmError> {
        if let Some(message) = self.list_error.lock().unwrap().clone() {
            return Err(SlurmError::Api(message));
        }
        Ok(self.nodes.lock().unwrap().values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, SlurmError> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SlurmError::NotFound(format!("Node {} not found", name)))
    }
}
