//! Worker pod construction.
//!
//! - `merge`: container and environment variable merging
//! - `resources`: Kubernetes quantity parsing and worker resource limits
//! - `pod`: the worker pod built for one NodeSet ordinal

pub mod merge;
pub mod pod;
pub mod resources;

pub use pod::new_nodeset_pod;
