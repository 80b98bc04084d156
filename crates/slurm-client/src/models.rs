//! slurmrestd API models
//!
//! These models match the slurmrestd `v0.0.44` node endpoints. Only the
//! fields the controller consumes are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};

/// slurmrestd API version the client speaks
pub const API_VERSION: &str = "v0.0.44";

/// Response body of `GET /slurm/{version}/nodes/` and `/node/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    #[serde(default)]
    pub warnings: Vec<ApiMessage>,
}

/// Error or warning entry returned alongside a response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_number: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

impl ApiMessage {
    /// Human readable summary of the message
    pub fn summary(&self) -> String {
        match (self.error.is_empty(), self.description.is_empty()) {
            (false, false) => format!("{}: {}", self.error, self.description),
            (false, true) => self.error.clone(),
            (true, false) => self.description.clone(),
            (true, true) => format!("error {}", self.error_number),
        }
    }
}

/// Slurm node as reported by slurmrestd
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    /// Base state followed by any state flags (e.g. `["IDLE", "DRAIN"]`)
    #[serde(default)]
    pub state: Vec<NodeState>,
    /// Reason set by an administrator or slurmctld (drain, down)
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub cpus: i64,
    #[serde(default)]
    pub real_memory: i64,
}

impl Node {
    /// Create a node with the given states
    pub fn new(name: impl Into<String>, state: Vec<NodeState>) -> Self {
        Self {
            name: name.into(),
            state,
            ..Default::default()
        }
    }

    /// Whether the node reports `state`
    pub fn has_state(&self, state: NodeState) -> bool {
        self.state.contains(&state)
    }
}

/// Slurm node base states and state flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Idle,
    Allocated,
    Mixed,
    Down,
    Error,
    Future,
    Unknown,
    Drain,
    Completing,
    Fail,
    Maintenance,
    NotResponding,
    RebootRequested,
    RebootIssued,
    PoweredDown,
    PoweringUp,
    PoweringDown,
    Planned,
    Reserved,
    /// Any state this client does not know about
    #[serde(other)]
    Other,
}

impl NodeState {
    /// PascalCase name used when the state is mirrored onto a pod condition
    pub fn condition_name(&self) -> &'static str {
        match self {
            NodeState::Idle => "Idle",
            NodeState::Allocated => "Allocated",
            NodeState::Mixed => "Mixed",
            NodeState::Down => "Down",
            NodeState::Error => "Error",
            NodeState::Future => "Future",
            NodeState::Unknown => "Unknown",
            NodeState::Drain => "Drain",
            NodeState::Completing => "Completing",
            NodeState::Fail => "Fail",
            NodeState::Maintenance => "Maintenance",
            NodeState::NotResponding => "NotResponding",
            NodeState::RebootRequested => "RebootRequested",
            NodeState::RebootIssued => "RebootIssued",
            NodeState::PoweredDown => "PoweredDown",
            NodeState::PoweringUp => "PoweringUp",
            NodeState::PoweringDown => "PoweringDown",
            NodeState::Planned => "Planned",
            NodeState::Reserved => "Reserved",
            NodeState::Other => "Other",
        }
    }

    /// States whose condition message carries the node reason
    pub fn carries_reason(&self) -> bool {
        matches!(self, NodeState::Drain | NodeState::Down | NodeState::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_response_deserializes_states_and_flags() {
        let body = serde_json::json!({
            "nodes": [
                {
                    "name": "foo-0",
                    "hostname": "foo-0",
                    "state": ["IDLE", "DRAIN"],
                    "reason": "maintenance window",
                    "cpus": 4,
                    "real_memory": 2048,
                    "features": ["gpu"]
                },
                { "name": "foo-1", "state": ["ALLOCATED", "NOT_RESPONDING", "BRAND_NEW_FLAG"] }
            ],
            "errors": [],
            "warnings": []
        });

        let response: NodesResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.nodes.len(), 2);

        let first = &response.nodes[0];
        assert_eq!(first.state, vec![NodeState::Idle, NodeState::Drain]);
        assert_eq!(first.reason, "maintenance window");
        assert_eq!(first.real_memory, 2048);

        let second = &response.nodes[1];
        assert!(second.has_state(NodeState::NotResponding));
        assert!(second.has_state(NodeState::Other));
    }

    #[test]
    fn test_condition_names() {
        assert_eq!(NodeState::Idle.condition_name(), "Idle");
        assert_eq!(NodeState::NotResponding.condition_name(), "NotResponding");
        assert!(NodeState::Drain.carries_reason());
        assert!(!NodeState::Idle.carries_reason());
    }

    #[test]
    fn test_api_message_summary() {
        let message = ApiMessage {
            error: "Unable to query node".to_string(),
            description: "node not found".to_string(),
            ..Default::default()
        };
        assert_eq!(message.summary(), "Unable to query node: node not found");
        assert_eq!(ApiMessage { error_number: 7, ..Default::default() }.summary(), "error 7");
    }
}
