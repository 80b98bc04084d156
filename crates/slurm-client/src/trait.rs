//! SlurmClient trait for mocking
//!
//! The concrete `SlurmClient` implements this trait; tests and the client
//! registry work against `dyn SlurmClientTrait`.

use crate::error::SlurmError;
use crate::models::Node;

/// Trait for slurmrestd client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SlurmClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Check connectivity and token validity
    async fn ping(&self) -> Result<(), SlurmError>;

    /// List every node known to the Slurm controller
    async fn list_nodes(&self) -> Result<Vec<Node>, SlurmError>;

    /// Get a single node by name
    async fn get_node(&self, name: &str) -> Result<Node, SlurmError>;
}
