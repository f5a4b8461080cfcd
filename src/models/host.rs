//! Host model - machines that run node containers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A container host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    /// Operator-facing name, unique
    pub name: String,
    /// Runtime connection descriptor (`local`, `unix:///...`, `tcp://...`)
    pub endpoint: String,
    /// Maximum active nodes this host accepts
    pub max_nodes: Option<u32>,
    /// Free-form capacity metadata
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Host registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHost {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub max_nodes: Option<u32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewHost {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            max_nodes: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_max_nodes(mut self, max: u32) -> Self {
        self.max_nodes = Some(max);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
