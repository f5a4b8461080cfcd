//! Audit event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Created,
    Started,
    Stopped,
    Deleted,
    Error,
    DriftCorrected,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Created,
        EventKind::Started,
        EventKind::Stopped,
        EventKind::Deleted,
        EventKind::Error,
        EventKind::DriftCorrected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Started => "started",
            EventKind::Stopped => "stopped",
            EventKind::Deleted => "deleted",
            EventKind::Error => "error",
            EventKind::DriftCorrected => "drift-corrected",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// None for host-level events
    pub node_id: Option<i64>,
    pub kind: EventKind,
    pub detail: String,
}

/// Event to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub node_id: Option<i64>,
    pub kind: EventKind,
    pub detail: String,
}

impl NewEvent {
    pub fn node(node_id: i64, kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id),
            kind,
            detail: detail.into(),
        }
    }

    pub fn host_level(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            node_id: None,
            kind,
            detail: detail.into(),
        }
    }
}

/// Number of events to return from a listing.
///
/// Parsing is lenient: anything that is not a positive integer falls back to
/// the default instead of being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLimit(usize);

impl EventLimit {
    pub const DEFAULT: usize = 50;

    /// Zero falls back to the default.
    pub fn new(limit: usize) -> Self {
        if limit == 0 {
            Self::default()
        } else {
            Self(limit)
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => Self(n as usize),
            _ => Self::default(),
        }
    }

    /// Parse an optional query value, like `?limit=` on a listing
    pub fn from_query(raw: Option<&str>) -> Self {
        raw.map(Self::parse).unwrap_or_default()
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for EventLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl From<usize> for EventLimit {
    fn from(limit: usize) -> Self {
        Self::new(limit)
    }
}
