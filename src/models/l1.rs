//! L1 binding model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Membership of a node in a logical network or subnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Binding {
    pub id: i64,
    pub node_id: i64,
    pub network_id: String,
    /// Join metadata
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
