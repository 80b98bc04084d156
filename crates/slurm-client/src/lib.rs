//! Slurm REST API Client
//!
//! A Rust client library for the slurmrestd REST API, limited to the node
//! queries the NodeSet controller needs to mirror Slurm node state onto pods.
//!
//! # Example
//!
//! ```no_run
//! use slurm_client::{SlurmClient, SlurmClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SlurmClient::new(
//!     "http://slurm-restapi:6820".to_string(),
//!     "jwt-token".to_string(),
//! )?;
//!
//! for node in client.list_nodes().await? {
//!     println!("{}: {:?}", node.name, node.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod slurm_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::SlurmClient;
pub use error::SlurmError;
pub use models::*;
pub use slurm_trait::SlurmClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockSlurmClient;
