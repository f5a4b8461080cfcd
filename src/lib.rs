//! nodefleet - lifecycle manager for container-backed validator nodes
//!
//! Keeps a durable record of hosts, nodes, L1 memberships and an append-only
//! event log, and drives each node's container through its lifecycle on a
//! pluggable container runtime (Docker via bollard, or in-process for tests).
//! A background reconciler corrects the record when containers drift.
//!
//! # Example
//!
//! ```no_run
//! use nodefleet::models::{CreateNodeRequest, NewHost};
//! use nodefleet::runtime::DockerRuntime;
//! use nodefleet::{Manager, ManagerConfig, Reconciler, Store};
//! use std::sync::Arc;
//!
//! # async fn run() -> nodefleet::Result<()> {
//! let config = ManagerConfig::default();
//! let manager = Manager::new(Store::open(&config.db_path)?, config);
//!
//! let docker = DockerRuntime::connect("local")?;
//! manager.add_host(NewHost::new("local", "local"), Arc::new(docker))?;
//!
//! let node = manager.create_node(CreateNodeRequest::new(
//!     "val-1",
//!     "avaplatform/avalanchego:v1.11.0",
//!     9651,
//! ))?;
//! manager.start_node(node.id).await?;
//!
//! let reconciler = Reconciler::from_config(manager.clone()).spawn();
//! // ...
//! reconciler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod manager;
pub mod models;
pub mod reconciler;
pub mod runtime;

pub use config::ManagerConfig;
pub use db::Store;
pub use error::{Error, ErrorKind, Result};
pub use manager::{Manager, StatusReport};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerHandle};
pub use runtime::{ContainerRuntime, RuntimeError};
