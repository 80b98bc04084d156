//! Resource limits of worker containers.
//!
//! slurmd advertises CPUs and RealMemory to slurmctld. Both are derived from
//! the container limits so Slurm never schedules more than the pod may use.

use super::merge::merge_container;
use crate::error::ControllerError;
use crds::NodeSet;
use k8s_openapi::api::core::v1::Container;

/// Name of the worker container
pub const SLURMD_CONTAINER: &str = "slurmd";

const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Parse a Kubernetes quantity string (`500m`, `2`, `4Gi`, `1e3`, `1.5G`)
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }
    if let Ok(value) = quantity.parse::<f64>() {
        return value.is_finite().then_some(value);
    }

    let split = quantity.find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))?;
    let (number, suffix) = quantity.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        _ => return None,
    };
    Some(number * multiplier)
}

/// CPU limit in whole cores (rounded up) and memory limit in bytes; 0 when unset
pub fn container_resource_limits(container: &Container) -> (i64, i64) {
    let limits = container
        .resources
        .as_ref()
        .and_then(|resources| resources.limits.as_ref());
    let limit = |name: &str| {
        limits
            .and_then(|limits| limits.get(name))
            .and_then(|quantity| parse_quantity(&quantity.0))
            .unwrap_or(0.0)
    };

    let cpus = limit("cpu").ceil() as i64;
    let memory = limit("memory").round() as i64;
    (cpus, memory)
}

/// CPUs and memory (MiB) a NodeSet's worker may use.
///
/// The `slurmd` override wins per resource over the template's slurmd container.
pub fn worker_resource_limits(nodeset: &NodeSet) -> Result<(i64, i64), ControllerError> {
    let template = nodeset
        .spec
        .template
        .spec
        .containers
        .iter()
        .find(|container| container.name == SLURMD_CONTAINER)
        .cloned()
        .unwrap_or_default();
    let container = merge_container(&template, &nodeset.spec.slurmd)?;
    let (cpus, memory) = container_resource_limits(&container);
    Ok((cpus, memory / BYTES_PER_MIB))
}
