//! Slurm NodeSet CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the NodeSet controller.

pub mod controller;
pub mod nodeset;
pub mod references;

pub use controller::*;
pub use nodeset::*;
pub use references::*;
