//! Container runtime adapter
//!
//! A thin translation layer over a container runtime. Containers are addressed
//! by the id the runtime assigned at creation, but every container the manager
//! creates also carries a label naming its node, so the owning container can
//! be rediscovered after the cached id is lost.

pub mod docker;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use docker::DockerRuntime;
pub use memory::MemoryRuntime;

/// Errors surfaced by a runtime adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{0}")]
    Api(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Live status of a container as observed by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Exited,
    Missing,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Missing => write!(f, "missing"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Host port published for a container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// Named volume mounted into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub env: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.push(PortMapping {
            container_port,
            host_port,
        });
        self
    }

    pub fn volume(mut self, volume: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            volume: volume.into(),
            target: target.into(),
        });
        self
    }

    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.env.push(var.into());
        self
    }
}

/// How much of the log to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTail {
    #[default]
    All,
    Last(usize),
}

impl LogTail {
    /// Lenient parse of a tail query: a positive count, anything else means all
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => LogTail::Last(n),
            _ => LogTail::All,
        }
    }
}

impl std::fmt::Display for LogTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogTail::All => write!(f, "all"),
            LogTail::Last(n) => write!(f, "{}", n),
        }
    }
}

/// Log stream options. Without `follow` the stream ends at the current end of log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogOptions {
    pub tail: LogTail,
    pub follow: bool,
}

impl LogOptions {
    pub fn tail(mut self, tail: LogTail) -> Self {
        self.tail = tail;
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }
}

/// Lazy sequence of log chunks; dropping it releases the runtime-side handle
pub type LogStream = BoxStream<'static, RuntimeResult<Bytes>>;

/// `key=value` form used by runtime label filters
pub fn label_filter(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Inverse of [`label_filter`]. A filter without `=` matches on the key alone.
pub fn split_label_filter(filter: &str) -> (&str, Option<&str>) {
    match filter.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (filter, None),
    }
}

/// Operations the lifecycle manager needs from a container runtime
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its runtime id
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stop gracefully, killing after `timeout`. Stopping a stopped container succeeds.
    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> RuntimeResult<()>;

    /// Remove a named volume. Removing a volume that does not exist succeeds.
    async fn remove_volume(&self, name: &str) -> RuntimeResult<()>;

    /// Never fails with `NotFound`; an unknown id is reported as `Missing`
    async fn inspect_status(&self, id: &str) -> RuntimeResult<ContainerStatus>;

    async fn stream_logs(&self, id: &str, options: &LogOptions) -> RuntimeResult<LogStream>;

    /// Find a container (running or not) carrying every `key=value` label in `filters`
    async fn find_by_labels(&self, filters: &[String]) -> RuntimeResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_filter() {
        assert_eq!(label_filter("managed-node", "42"), "managed-node=42");
        assert_eq!(
            split_label_filter("managed-by=nodefleet"),
            ("managed-by", Some("nodefleet"))
        );
        assert_eq!(split_label_filter("managed-by"), ("managed-by", None));
    }

    #[test]
    fn test_log_tail_parse() {
        assert_eq!(LogTail::parse("100"), LogTail::Last(100));
        assert_eq!(LogTail::parse("all"), LogTail::All);
        assert_eq!(LogTail::parse("0"), LogTail::All);
        assert_eq!(LogTail::parse(""), LogTail::All);
        assert_eq!(LogTail::Last(5).to_string(), "5");
    }

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new("nodefleet-val-1", "avax:latest")
            .label("managed-node", "1")
            .port(9651, 19651)
            .volume("nodefleet-1-data", "/data");
        assert_eq!(spec.labels.get("managed-node").map(String::as_str), Some("1"));
        assert_eq!(spec.ports[0].host_port, 19651);
        assert_eq!(spec.volumes[0].target, "/data");
    }
}
