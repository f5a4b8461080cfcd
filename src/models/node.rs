//! Node model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Record exists, no container yet
    Created,
    /// Container is being created or started
    Starting,
    /// Container confirmed running
    Running,
    /// Container is being stopped
    Stopping,
    /// Container exists but is not running
    Stopped,
    /// Container and bindings are being removed
    Deleting,
    /// Retained for audit only
    Deleted,
    /// A runtime call failed or the container drifted away
    Error,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 8] = [
        NodeStatus::Created,
        NodeStatus::Starting,
        NodeStatus::Running,
        NodeStatus::Stopping,
        NodeStatus::Stopped,
        NodeStatus::Deleting,
        NodeStatus::Deleted,
        NodeStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Created => "created",
            NodeStatus::Starting => "starting",
            NodeStatus::Running => "running",
            NodeStatus::Stopping => "stopping",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Deleting => "deleting",
            NodeStatus::Deleted => "deleted",
            NodeStatus::Error => "error",
        }
    }

    /// In-progress transition states
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeStatus::Starting | NodeStatus::Stopping | NodeStatus::Deleting
        )
    }

    /// Whether a node in this status carries a container reference
    pub fn holds_container(&self) -> bool {
        matches!(
            self,
            NodeStatus::Starting | NodeStatus::Running | NodeStatus::Stopping | NodeStatus::Stopped
        )
    }

    /// Settled states the reconciler compares against the runtime
    pub fn is_reconcilable(&self) -> bool {
        matches!(self, NodeStatus::Running | NodeStatus::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for NodeStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Mutating operations on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Stop,
    Delete,
    SetIdentity,
    BindL1,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::Stop => write!(f, "stop"),
            Operation::Delete => write!(f, "delete"),
            Operation::SetIdentity => write!(f, "set identity of"),
            Operation::BindL1 => write!(f, "bind L1 to"),
        }
    }
}

/// A managed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned identifier
    pub id: i64,
    /// Display name, unique among active nodes
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Identity reported by the workload itself
    pub node_id: Option<String>,
    /// Host port bound to the staking port
    pub staking_port: u16,
    /// Current status
    pub status: NodeStatus,
    /// Owning host; cleared only after soft deletion when the host is removed
    pub host_id: Option<i64>,
    /// Runtime container id (a cache, the label is authoritative)
    pub container_id: Option<String>,
    /// Last failure detail while in error
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id,
            name: self.name.clone(),
            image: self.image.clone(),
            node_id: self.node_id.clone(),
            staking_port: self.staking_port,
            status: self.status,
        }
    }
}

/// Compact view used by the status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub node_id: Option<String>,
    pub staking_port: u16,
    pub status: NodeStatus,
}

/// Request to register a new node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub image: String,
    pub staking_port: u16,
    #[serde(default)]
    pub host_id: Option<i64>,
    #[serde(default)]
    pub l1s: Vec<L1Request>,
}

impl CreateNodeRequest {
    pub fn new(name: impl Into<String>, image: impl Into<String>, staking_port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            staking_port,
            host_id: None,
            l1s: Vec::new(),
        }
    }

    pub fn on_host(mut self, host_id: i64) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn with_l1(mut self, l1: L1Request) -> Self {
        self.l1s.push(l1);
        self
    }
}

/// Network membership to record alongside a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Request {
    pub network_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl L1Request {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in NodeStatus::ALL {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        assert!("paused".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_container_bearing_statuses() {
        let holding: Vec<_> = NodeStatus::ALL
            .iter()
            .filter(|s| s.holds_container())
            .collect();
        assert_eq!(
            holding,
            vec![
                &NodeStatus::Starting,
                &NodeStatus::Running,
                &NodeStatus::Stopping,
                &NodeStatus::Stopped
            ]
        );
        assert!(!NodeStatus::Error.holds_container());
    }

    #[test]
    fn test_transient_statuses() {
        assert!(NodeStatus::Starting.is_transient());
        assert!(NodeStatus::Deleting.is_transient());
        assert!(!NodeStatus::Running.is_transient());
        assert!(!NodeStatus::Error.is_transient());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&NodeStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }

    #[test]
    fn test_create_request_builder() {
        let req = CreateNodeRequest::new("val-1", "avax:latest", 9651)
            .on_host(2)
            .with_l1(L1Request::new("subnet-a"));
        assert_eq!(req.host_id, Some(2));
        assert_eq!(req.l1s.len(), 1);
        assert_eq!(req.l1s[0].network_id, "subnet-a");
    }
}
