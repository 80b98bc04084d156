//! Slurm node state mirrored onto pod conditions.
//!
//! Every Slurm state or flag reported for a node becomes one pod condition
//! whose type is `SlurmNodeState<State>`. Conditions outside that prefix
//! belong to the kubelet and are never touched.

use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use slurm_client::{Node, NodeState};

/// Reserved prefix of condition types owned by the Slurm synchronizer
pub const SLURM_CONDITION_PREFIX: &str = "SlurmNodeState";

/// Condition type for a Slurm state
pub fn slurm_condition_type(state: NodeState) -> String {
    format!("{}{}", SLURM_CONDITION_PREFIX, state.condition_name())
}

/// True when the condition is owned by the Slurm synchronizer
pub fn is_slurm_condition(condition: &PodCondition) -> bool {
    condition.type_.starts_with(SLURM_CONDITION_PREFIX)
}

/// Conditions describing a Slurm node, one per distinct state
pub fn node_conditions(node: &Node, now: &Time) -> Vec<PodCondition> {
    let mut conditions: Vec<PodCondition> = Vec::with_capacity(node.state.len());
    for state in &node.state {
        let condition_type = slurm_condition_type(*state);
        if conditions.iter().any(|c| c.type_ == condition_type) {
            continue;
        }
        let message = (state.carries_reason() && !node.reason.is_empty())
            .then(|| node.reason.clone());
        conditions.push(PodCondition {
            type_: condition_type,
            status: "True".to_string(),
            message,
            last_transition_time: Some(now.clone()),
            ..Default::default()
        });
    }
    conditions
}

/// Rewrite the Slurm-owned subset of `existing` to match `desired`.
///
/// Non-Slurm conditions keep their position. Slurm conditions present in
/// both are updated in place, keeping the transition time unless the status
/// flips. Stale Slurm conditions are dropped and new ones appended.
pub fn merge_slurm_conditions(
    existing: &[PodCondition],
    desired: &[PodCondition],
) -> Vec<PodCondition> {
    let mut merged: Vec<PodCondition> = Vec::with_capacity(existing.len() + desired.len());

    for condition in existing {
        if !is_slurm_condition(condition) {
            merged.push(condition.clone());
            continue;
        }
        let Some(wanted) = desired.iter().find(|d| d.type_ == condition.type_) else {
            continue;
        };
        if merged.iter().any(|m| m.type_ == condition.type_) {
            continue;
        }
        let mut updated = condition.clone();
        if updated.status != wanted.status {
            updated.status = wanted.status.clone();
            updated.last_transition_time = wanted.last_transition_time.clone();
        }
        updated.message = wanted.message.clone();
        updated.reason = wanted.reason.clone();
        merged.push(updated);
    }

    for wanted in desired {
        if !merged.iter().any(|m| m.type_ == wanted.type_) {
            merged.push(wanted.clone());
        }
    }

    merged
}
