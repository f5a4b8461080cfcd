//! Reconciliation loop
//!
//! Periodically compares settled node statuses with what the runtime reports
//! and corrects the store. Nodes another operation holds are skipped for the
//! pass; failures are logged and never stop the loop.

use crate::db::Transition;
use crate::locks::Holder;
use crate::manager::{short_id, with_deadline, Manager};
use crate::models::{EventKind, Node, NodeStatus};
use crate::runtime::{ContainerRuntime, ContainerStatus, RuntimeError};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome of one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inspected: usize,
    pub corrected: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Reconciler {
    manager: Manager,
    interval: Duration,
}

/// Handle to a running reconciliation loop
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop, letting an in-flight pass finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}

impl Reconciler {
    pub fn new(manager: Manager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Use the configured interval
    pub fn from_config(manager: Manager) -> Self {
        let interval = manager.config().reconcile_interval();
        Self::new(manager, interval)
    }

    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, "Reconciler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        if report.corrected > 0 || report.failed > 0 {
                            tracing::info!(
                                inspected = report.inspected,
                                corrected = report.corrected,
                                skipped = report.skipped,
                                failed = report.failed,
                                "Reconcile pass"
                            );
                        } else {
                            tracing::debug!(inspected = report.inspected, skipped = report.skipped, "Reconcile pass");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Reconciler stopped");
        });
        ReconcilerHandle { shutdown, task }
    }

    /// One pass over every running or stopped node
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let store = self.manager.store();

        let nodes = match store.list_nodes_with_status(&[NodeStatus::Running, NodeStatus::Stopped]) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!(error = %e, "Reconciler could not list nodes");
                report.failed += 1;
                return report;
            }
        };

        for candidate in nodes {
            let Ok(_guard) = self
                .manager
                .locks()
                .try_claim(candidate.id, Holder::Reconciler)
            else {
                report.skipped += 1;
                continue;
            };

            // Status may have moved since the listing
            let node = match store.get_node(candidate.id) {
                Ok(Some(node)) if node.status.is_reconcilable() => node,
                Ok(_) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(node = candidate.id, error = %e, "Reconciler could not read node");
                    report.failed += 1;
                    continue;
                }
            };

            report.inspected += 1;
            match self.reconcile_node(&node).await {
                Ok(true) => report.corrected += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(node = node.id, status = %node.status, error = %e, "Reconcile failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Returns whether a correction was recorded
    async fn reconcile_node(&self, node: &Node) -> Result<bool> {
        let runtime = self.manager.runtime_for(node)?;
        let cached = node.container_id.clone();

        let mut container = cached.clone();
        let mut live = match &cached {
            Some(id) => self.inspect(runtime.as_ref(), id).await?,
            None => ContainerStatus::Missing,
        };

        if live == ContainerStatus::Missing {
            if let Some(found) = self.manager.find_container(node, runtime.as_ref()).await? {
                if Some(&found) != cached.as_ref() {
                    live = self.inspect(runtime.as_ref(), &found).await?;
                    container = Some(found);
                }
            }
        }

        if live == ContainerStatus::Unknown {
            return Err(Error::Runtime(RuntimeError::Api(format!(
                "container of node {} is in an unknown state",
                node.id
            ))));
        }

        let target = match (node.status, live) {
            (NodeStatus::Running, ContainerStatus::Exited) => Some(NodeStatus::Stopped),
            (NodeStatus::Stopped, ContainerStatus::Running) => Some(NodeStatus::Running),
            (_, ContainerStatus::Missing) => Some(NodeStatus::Error),
            _ => None,
        };
        let refreshed = container != cached;
        if target.is_none() && !refreshed {
            return Ok(false);
        }

        let to = target.unwrap_or(node.status);
        let mut detail = format!("stored {}, container {}", node.status, live);
        let mut transition = Transition::new(node.id, node.status, to);
        match (&container, to) {
            (_, NodeStatus::Error) => {
                transition = transition
                    .clear_container()
                    .with_error("container missing");
            }
            (Some(id), _) if refreshed => {
                detail.push_str(&format!(", reference refreshed to {}", short_id(id)));
                transition = transition.set_container(id);
            }
            _ => {}
        }
        if to != node.status {
            detail.push_str(&format!(", now {}", to));
        }

        self.manager
            .store()
            .transition(&transition.with_event(EventKind::DriftCorrected, &detail))?;
        tracing::info!(node = node.id, from = %node.status, to = %to, live = %live, "Corrected drift");
        Ok(true)
    }

    async fn inspect(&self, runtime: &dyn ContainerRuntime, id: &str) -> Result<ContainerStatus> {
        let status = with_deadline(
            "inspect_status",
            self.manager.config().runtime_timeout(),
            runtime.inspect_status(id),
        )
        .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::db::Store;
    use crate::models::{CreateNodeRequest, EventLimit, NewHost, Operation};
    use crate::runtime::memory::RuntimeOp;
    use crate::runtime::{ContainerSpec, MemoryRuntime};
    use std::sync::Arc;

    async fn running_node(name: &str, port: u16) -> (Manager, MemoryRuntime, Node) {
        let runtime = MemoryRuntime::new();
        let manager = Manager::new(Store::in_memory().unwrap(), ManagerConfig::default());
        manager
            .add_host(NewHost::new("local", "memory"), Arc::new(runtime.clone()))
            .unwrap();
        let node = manager
            .create_node(CreateNodeRequest::new(name, "avax:latest", port))
            .unwrap();
        let node = manager.start_node(node.id).await.unwrap();
        (manager, runtime, node)
    }

    fn last_event(manager: &Manager, id: i64) -> EventKind {
        manager.list_node_events(id, EventLimit::new(1)).unwrap()[0].kind
    }

    #[tokio::test]
    async fn test_in_sync_node_is_untouched() {
        let (manager, _runtime, node) = running_node("val-1", 9651).await;
        let report = Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(
            report,
            ReconcileReport {
                inspected: 1,
                ..Default::default()
            }
        );
        assert_eq!(last_event(&manager, node.id), EventKind::Started);
    }

    #[tokio::test]
    async fn test_exited_container_marks_node_stopped() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        let container = node.container_id.clone().unwrap();
        runtime.kill(&container);

        let report = Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(report.corrected, 1);

        let node = manager.get_node(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(node.container_id.as_deref(), Some(container.as_str()));
        assert_eq!(last_event(&manager, node.id), EventKind::DriftCorrected);
    }

    #[tokio::test]
    async fn test_missing_container_marks_node_error() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        runtime.purge(node.container_id.as_deref().unwrap());

        Reconciler::from_config(manager.clone()).run_once().await;
        let node = manager.get_node(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Error);
        assert!(node.container_id.is_none());
    }

    #[tokio::test]
    async fn test_revived_container_marks_node_running() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        manager.stop_node(node.id).await.unwrap();
        runtime.revive(node.container_id.as_deref().unwrap());

        Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_relabelled_container_refreshes_reference() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        manager.stop_node(node.id).await.unwrap();
        runtime.purge(node.container_id.as_deref().unwrap());
        let replacement = runtime
            .create_container(
                &ContainerSpec::new("recreated", "avax:latest")
                    .label("managed-node", node.id.to_string())
                    .label("managed-by", "nodefleet"),
            )
            .await
            .unwrap();

        let report = Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(report.corrected, 1);

        let node = manager.get_node(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(node.container_id, Some(replacement));
    }

    #[tokio::test]
    async fn test_foreign_container_is_not_adopted() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        manager.stop_node(node.id).await.unwrap();
        runtime.purge(node.container_id.as_deref().unwrap());
        let foreign = runtime
            .create_container(
                &ContainerSpec::new("otherfleet-db", "postgres:16")
                    .label("managed-node", node.id.to_string())
                    .label("managed-by", "otherfleet"),
            )
            .await
            .unwrap();

        Reconciler::from_config(manager.clone()).run_once().await;

        let node = manager.get_node(node.id).unwrap();
        assert_eq!(node.status, NodeStatus::Error);
        assert_ne!(node.container_id, Some(foreign));
    }

    #[tokio::test]
    async fn test_held_node_is_skipped() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        runtime.kill(node.container_id.as_deref().unwrap());

        let _held = manager
            .locks()
            .try_claim(node.id, Holder::Lifecycle(Operation::Stop))
            .unwrap();
        let report = Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inspected, 0);
        assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_inspect_failure_counts_as_failed() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        runtime.fail_next(RuntimeOp::Inspect, RuntimeError::Api("daemon hiccup".into()));

        let report = Reconciler::from_config(manager.clone()).run_once().await;
        assert_eq!(report.failed, 1);
        assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_corrects_and_shuts_down() {
        let (manager, runtime, node) = running_node("val-1", 9651).await;
        let handle = Reconciler::new(manager.clone(), Duration::from_secs(5)).spawn();

        runtime.kill(node.container_id.as_deref().unwrap());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Stopped);

        handle.shutdown().await;
    }
}
