//! Node lifecycle manager
//!
//! Drives nodes through `created -> starting -> running -> stopping -> stopped
//! -> deleting -> deleted`, with `error` reachable from every runtime step.
//! Every transition is persisted together with its audit event, and at most
//! one mutating operation runs against a node at a time.

use crate::config::ManagerConfig;
use crate::db::{NewNode, Store, TableCounts, Transition};
use crate::locks::{Holder, NodeGuard, NodeLocks};
use crate::models::*;
use crate::runtime::{
    label_filter, ContainerRuntime, ContainerSpec, ContainerStatus, LogOptions, LogStream,
    RuntimeError, RuntimeResult,
};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

static NODE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,62}$").expect("node name pattern"));

// [registry[:port]/]path[:tag][@digest]
static IMAGE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?::[0-9]+)?(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
    )
    .expect("image reference pattern")
});

const START_FROM: &[NodeStatus] = &[NodeStatus::Created, NodeStatus::Stopped, NodeStatus::Error];
const STOP_FROM: &[NodeStatus] = &[NodeStatus::Running, NodeStatus::Error];
const DELETE_FROM: &[NodeStatus] = &[
    NodeStatus::Created,
    NodeStatus::Running,
    NodeStatus::Stopped,
    NodeStatus::Error,
];
// Bindings and identity can be recorded until the node is retired
const ANNOTATE_FROM: &[NodeStatus] = &[
    NodeStatus::Created,
    NodeStatus::Starting,
    NodeStatus::Running,
    NodeStatus::Stopping,
    NodeStatus::Stopped,
    NodeStatus::Error,
];

/// Snapshot of the managed fleet
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub counts: TableCounts,
    pub nodes: Vec<NodeSummary>,
}

struct Inner {
    store: Store,
    config: ManagerConfig,
    locks: NodeLocks,
    runtimes: RwLock<HashMap<i64, Arc<dyn ContainerRuntime>>>,
    // Serializes admission checks so capacity is exact
    create_lock: Mutex<()>,
}

/// Lifecycle manager. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn new(store: Store, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                locks: NodeLocks::new(),
                runtimes: RwLock::new(HashMap::new()),
                create_lock: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub(crate) fn locks(&self) -> &NodeLocks {
        &self.inner.locks
    }

    // ===== Hosts =====

    /// Register a host and attach the runtime that reaches it
    pub fn add_host(&self, host: NewHost, runtime: Arc<dyn ContainerRuntime>) -> Result<Host> {
        if host.name.trim().is_empty() {
            return Err(Error::Validation("host name cannot be empty".into()));
        }
        if self.inner.store.get_host_by_name(&host.name)?.is_some() {
            return Err(Error::Validation(format!("host {} already exists", host.name)));
        }
        let host = self.inner.store.insert_host(&host)?;
        self.inner.runtimes.write().insert(host.id, runtime);
        tracing::info!(host = host.id, name = %host.name, endpoint = %host.endpoint, "Registered host");
        Ok(host)
    }

    /// Attach (or replace) the runtime of a registered host, e.g. after a restart
    pub fn attach_runtime(&self, host_id: i64, runtime: Arc<dyn ContainerRuntime>) -> Result<()> {
        self.get_host(host_id)?;
        self.inner.runtimes.write().insert(host_id, runtime);
        tracing::debug!(host = host_id, "Attached runtime");
        Ok(())
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        self.inner.store.list_hosts()
    }

    pub fn get_host(&self, id: i64) -> Result<Host> {
        self.inner
            .store
            .get_host(id)?
            .ok_or_else(|| Error::host_not_found(id))
    }

    /// Remove a host that no active node references
    pub fn remove_host(&self, id: i64) -> Result<()> {
        if !self.inner.store.delete_host(id)? {
            return Err(Error::host_not_found(id));
        }
        self.inner.runtimes.write().remove(&id);
        tracing::info!(host = id, "Removed host");
        Ok(())
    }

    pub(crate) fn runtime_for(&self, node: &Node) -> Result<Arc<dyn ContainerRuntime>> {
        let host_id = node
            .host_id
            .ok_or_else(|| Error::Validation(format!("node {} has no host", node.id)))?;
        self.inner
            .runtimes
            .read()
            .get(&host_id)
            .cloned()
            .ok_or_else(|| {
                Error::Runtime(RuntimeError::Unavailable(format!(
                    "no runtime attached to host {}",
                    host_id
                )))
            })
    }

    // ===== Reads =====

    /// Active nodes
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.inner.store.list_nodes(false)
    }

    /// All nodes, including soft-deleted ones
    pub fn list_all_nodes(&self) -> Result<Vec<Node>> {
        self.inner.store.list_nodes(true)
    }

    pub fn get_node(&self, id: i64) -> Result<Node> {
        self.inner
            .store
            .get_node(id)?
            .ok_or_else(|| Error::node_not_found(id))
    }

    pub fn list_events(&self, limit: EventLimit) -> Result<Vec<Event>> {
        self.inner.store.list_events(limit)
    }

    pub fn list_node_events(&self, id: i64, limit: EventLimit) -> Result<Vec<Event>> {
        self.get_node(id)?;
        self.inner.store.list_node_events(id, limit)
    }

    /// Lenient limit parse using the configured default
    pub fn event_limit(&self, raw: Option<&str>) -> EventLimit {
        match raw.map(|r| r.trim().parse::<i64>()) {
            Some(Ok(n)) if n > 0 => EventLimit::new(n as usize),
            _ => EventLimit::new(self.inner.config.default_event_limit),
        }
    }

    pub fn list_l1_bindings(&self, id: i64) -> Result<Vec<L1Binding>> {
        self.get_node(id)?;
        self.inner.store.list_l1_bindings(id)
    }

    pub fn status_report(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            counts: self.inner.store.counts()?,
            nodes: self.list_nodes()?.iter().map(Node::summary).collect(),
        })
    }

    // ===== Create =====

    /// Register a node. Makes no runtime call.
    pub fn create_node(&self, req: CreateNodeRequest) -> Result<Node> {
        validate_request(&req)?;

        let _admission = self.inner.create_lock.lock();
        let host = self.resolve_host(req.host_id)?;
        if !self.inner.runtimes.read().contains_key(&host.id) {
            return Err(Error::Validation(format!(
                "no runtime attached to host {}",
                host.name
            )));
        }
        if self.inner.store.get_active_node_by_name(&req.name)?.is_some() {
            return Err(Error::Validation(format!(
                "node name {} already in use",
                req.name
            )));
        }
        if self.inner.store.port_in_use(host.id, req.staking_port)? {
            return Err(Error::Validation(format!(
                "staking port {} already in use on host {}",
                req.staking_port, host.name
            )));
        }
        if let Some(max) = host.max_nodes {
            let active = self.inner.store.count_active_nodes_on_host(host.id)?;
            if active >= u64::from(max) {
                return Err(Error::Validation(format!(
                    "host {} is at capacity ({} nodes)",
                    host.name, max
                )));
            }
        }

        let node = self.inner.store.insert_node(&NewNode {
            name: req.name,
            image: req.image,
            staking_port: req.staking_port,
            host_id: host.id,
            l1s: req.l1s,
        })?;
        tracing::info!(node = node.id, name = %node.name, host = host.id, "Created node");
        Ok(node)
    }

    fn resolve_host(&self, host_id: Option<i64>) -> Result<Host> {
        match host_id {
            Some(id) => self
                .inner
                .store
                .get_host(id)?
                .ok_or_else(|| Error::Validation(format!("host {} does not exist", id))),
            None => {
                let mut hosts = self.inner.store.list_hosts()?;
                match hosts.len() {
                    1 => Ok(hosts.remove(0)),
                    0 => Err(Error::Validation("no hosts registered".into())),
                    n => Err(Error::Validation(format!(
                        "{} hosts registered, host_id is required",
                        n
                    ))),
                }
            }
        }
    }

    // ===== Start =====

    /// Start a node from `created`, `stopped` or `error`
    pub async fn start_node(&self, id: i64) -> Result<Node> {
        let this = self.clone();
        run_to_completion(async move { this.do_start(id).await }).await
    }

    async fn do_start(&self, id: i64) -> Result<Node> {
        let (_guard, node) = self.claim(id, Operation::Start, START_FROM).await?;
        let runtime = self.runtime_for(&node)?;
        tracing::info!(node = id, name = %node.name, from = %node.status, "Starting node");

        let container = match node.container_id.clone() {
            Some(container) => container,
            None => match self.resolve_or_create(&node, runtime.as_ref()).await {
                Ok(container) => container,
                Err(e) => return Err(self.fail(id, node.status, Operation::Start, e)),
            },
        };

        self.inner.store.transition(
            &Transition::new(id, node.status, NodeStatus::Starting).set_container(&container),
        )?;

        match self.bring_up(runtime.as_ref(), &container).await {
            Ok(()) => {
                let node = self.inner.store.transition(
                    &Transition::new(id, NodeStatus::Starting, NodeStatus::Running).with_event(
                        EventKind::Started,
                        format!("container {} running", short_id(&container)),
                    ),
                )?;
                tracing::info!(node = id, container = %short_id(&container), "Node running");
                Ok(node)
            }
            Err(e) => Err(self.fail(id, NodeStatus::Starting, Operation::Start, e)),
        }
    }

    async fn bring_up(&self, runtime: &dyn ContainerRuntime, container: &str) -> RuntimeResult<()> {
        let timeout = self.inner.config.runtime_timeout();
        with_deadline("start_container", timeout, runtime.start_container(container)).await?;
        let status =
            with_deadline("inspect_status", timeout, runtime.inspect_status(container)).await?;
        if status != ContainerStatus::Running {
            return Err(RuntimeError::Api(format!(
                "container {} did not reach running (status {})",
                short_id(container),
                status
            )));
        }
        Ok(())
    }

    /// Container owning the node according to its labels
    pub(crate) async fn find_container(
        &self,
        node: &Node,
        runtime: &dyn ContainerRuntime,
    ) -> RuntimeResult<Option<String>> {
        let filters: Vec<String> = self
            .inner
            .config
            .node_labels(node.id)
            .iter()
            .map(|(key, value)| label_filter(key, value))
            .collect();
        with_deadline(
            "find_by_labels",
            self.inner.config.runtime_timeout(),
            runtime.find_by_labels(&filters),
        )
        .await
    }

    async fn resolve_or_create(
        &self,
        node: &Node,
        runtime: &dyn ContainerRuntime,
    ) -> RuntimeResult<String> {
        if let Some(existing) = self.find_container(node, runtime).await? {
            tracing::info!(node = node.id, container = %short_id(&existing), "Adopting labelled container");
            return Ok(existing);
        }
        let spec = self.container_spec(node);
        let container = with_deadline(
            "create_container",
            self.inner.config.runtime_timeout(),
            runtime.create_container(&spec),
        )
        .await?;
        tracing::info!(node = node.id, container = %short_id(&container), name = %spec.name, "Created container");
        Ok(container)
    }

    /// Container spec for a node: labels, staking port and data volume
    pub fn container_spec(&self, node: &Node) -> ContainerSpec {
        let config = &self.inner.config;
        config
            .node_labels(node.id)
            .into_iter()
            .fold(
                ContainerSpec::new(config.container_name(&node.name), &node.image),
                |spec, (key, value)| spec.label(key, value),
            )
            .port(config.staking_container_port, node.staking_port)
            .volume(config.volume_name(node.id), &config.data_mount_path)
    }

    // ===== Stop =====

    /// Stop a running node, or a node in error whose container still exists
    pub async fn stop_node(&self, id: i64) -> Result<Node> {
        let this = self.clone();
        run_to_completion(async move { this.do_stop(id).await }).await
    }

    async fn do_stop(&self, id: i64) -> Result<Node> {
        let (_guard, node) = self.claim(id, Operation::Stop, STOP_FROM).await?;
        let runtime = self.runtime_for(&node)?;

        let container = match (&node.status, &node.container_id) {
            (NodeStatus::Running, Some(container)) => container.clone(),
            (NodeStatus::Running, None) => {
                return Err(Error::Store(format!(
                    "running node {} has no container reference",
                    id
                )))
            }
            _ => match self.find_container(&node, runtime.as_ref()).await {
                Ok(Some(container)) => container,
                Ok(None) => {
                    return Err(invalid_transition(
                        &node,
                        Operation::Stop,
                        Some("no container exists".into()),
                    ))
                }
                Err(e) => return Err(self.fail(id, node.status, Operation::Stop, e)),
            },
        };

        tracing::info!(node = id, from = %node.status, container = %short_id(&container), "Stopping node");
        self.inner.store.transition(
            &Transition::new(id, node.status, NodeStatus::Stopping).set_container(&container),
        )?;

        let config = &self.inner.config;
        let stopped = with_deadline(
            "stop_container",
            config.stop_deadline(),
            runtime.stop_container(&container, config.stop_timeout()),
        )
        .await;

        match stopped {
            Ok(()) => {
                let node = self.inner.store.transition(
                    &Transition::new(id, NodeStatus::Stopping, NodeStatus::Stopped).with_event(
                        EventKind::Stopped,
                        format!("container {} stopped", short_id(&container)),
                    ),
                )?;
                tracing::info!(node = id, "Node stopped");
                Ok(node)
            }
            Err(e) => Err(self.fail(id, NodeStatus::Stopping, Operation::Stop, e)),
        }
    }

    // ===== Delete =====

    /// Stop and remove the node's container, drop its bindings and retire the record
    pub async fn delete_node(&self, id: i64, remove_volumes: bool) -> Result<Node> {
        let this = self.clone();
        run_to_completion(async move { this.do_delete(id, remove_volumes).await }).await
    }

    async fn do_delete(&self, id: i64, remove_volumes: bool) -> Result<Node> {
        let (_guard, node) = self.claim(id, Operation::Delete, DELETE_FROM).await?;
        let runtime = self.runtime_for(&node)?;
        tracing::info!(node = id, from = %node.status, remove_volumes, "Deleting node");

        self.inner.store.transition(
            &Transition::new(id, node.status, NodeStatus::Deleting).clear_container(),
        )?;

        match self
            .teardown(&node, runtime.as_ref(), remove_volumes)
            .await
        {
            Ok(removed) => {
                let detail = match removed {
                    Some(container) => format!("container {} removed", short_id(&container)),
                    None => "no container to remove".to_string(),
                };
                let node = self.inner.store.transition(
                    &Transition::new(id, NodeStatus::Deleting, NodeStatus::Deleted)
                        .dropping_l1_bindings()
                        .with_event(EventKind::Deleted, detail),
                )?;
                tracing::info!(node = id, "Node deleted");
                Ok(node)
            }
            Err(e) => Err(self.fail(id, NodeStatus::Deleting, Operation::Delete, e)),
        }
    }

    /// Force-stop and remove the node's container, and with `remove_volumes` its
    /// data volume. Returns the removed container id.
    async fn teardown(
        &self,
        node: &Node,
        runtime: &dyn ContainerRuntime,
        remove_volumes: bool,
    ) -> RuntimeResult<Option<String>> {
        let mut removed = None;
        if let Some(cached) = node.container_id.as_deref() {
            if self.force_remove(runtime, cached, remove_volumes).await? {
                removed = Some(cached.to_string());
            }
        }
        // No cached id, or a stale one: the labels are authoritative
        if removed.is_none() {
            if let Some(found) = self.find_container(node, runtime).await? {
                if self.force_remove(runtime, &found, remove_volumes).await? {
                    removed = Some(found);
                }
            }
        }

        if remove_volumes {
            let volume = self.inner.config.volume_name(node.id);
            with_deadline(
                "remove_volume",
                self.inner.config.runtime_timeout(),
                runtime.remove_volume(&volume),
            )
            .await?;
            tracing::debug!(node = node.id, volume = %volume, "Removed data volume");
        }
        Ok(removed)
    }

    /// Returns false when the container was already gone
    async fn force_remove(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &str,
        remove_volumes: bool,
    ) -> RuntimeResult<bool> {
        let timeout = self.inner.config.runtime_timeout();
        match with_deadline(
            "stop_container",
            timeout,
            runtime.stop_container(container, Duration::ZERO),
        )
        .await
        {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        match with_deadline(
            "remove_container",
            timeout,
            runtime.remove_container(container, remove_volumes),
        )
        .await
        {
            Ok(()) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ===== Logs =====

    /// Log stream of the node's container. Dropping the stream releases it.
    pub async fn node_logs(&self, id: i64, options: LogOptions) -> Result<LogStream> {
        let node = self.get_node(id)?;
        let container = node
            .container_id
            .clone()
            .ok_or_else(|| Error::NotFound(format!("container of node {}", id)))?;
        let runtime = self.runtime_for(&node)?;

        let stream = with_deadline(
            "stream_logs",
            self.inner.config.runtime_timeout(),
            runtime.stream_logs(&container, &options),
        )
        .await;
        match stream {
            Ok(stream) => Ok(stream),
            Err(RuntimeError::NotFound(_)) => Err(Error::NotFound(format!(
                "container {} of node {}",
                short_id(&container),
                id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    // ===== Bindings and identity =====

    /// Record an L1 membership for an active node
    pub async fn bind_l1(&self, id: i64, l1: L1Request) -> Result<L1Binding> {
        if l1.network_id.trim().is_empty() {
            return Err(Error::Validation("network_id cannot be empty".into()));
        }
        let _claim = self.claim(id, Operation::BindL1, ANNOTATE_FROM).await?;
        let binding = self.inner.store.insert_l1(id, &l1)?;
        tracing::info!(node = id, network = %binding.network_id, "Bound L1");
        Ok(binding)
    }

    /// Record the identity the workload reports for itself
    pub async fn set_node_identity(&self, id: i64, node_id: &str) -> Result<Node> {
        let node_id = node_id.trim();
        if node_id.is_empty() {
            return Err(Error::Validation("node_id cannot be empty".into()));
        }
        let _claim = self.claim(id, Operation::SetIdentity, ANNOTATE_FROM).await?;
        self.inner.store.set_node_identity(id, node_id)
    }

    // ===== Recovery =====

    /// Move nodes left in a transient status by a previous process to `error`
    pub fn recover_interrupted(&self) -> Result<usize> {
        let stuck = self.inner.store.list_nodes_with_status(&[
            NodeStatus::Starting,
            NodeStatus::Stopping,
            NodeStatus::Deleting,
        ])?;

        let mut recovered = 0;
        for node in stuck {
            let Ok(_guard) = self.inner.locks.try_claim(node.id, Holder::Reconciler) else {
                continue;
            };
            let message = format!("interrupted while {}", node.status);
            self.inner.store.transition(
                &Transition::new(node.id, node.status, NodeStatus::Error)
                    .clear_container()
                    .with_error(&message)
                    .with_event(EventKind::Error, &message),
            )?;
            tracing::warn!(node = node.id, status = %node.status, "Recovered interrupted node");
            recovered += 1;
        }
        Ok(recovered)
    }

    // ===== Helpers =====

    /// Claim a node for `op` and return it as read under the claim.
    ///
    /// The status is checked before claiming as well, so a request that can
    /// never succeed does not hold the node against one that can.
    async fn claim(
        &self,
        id: i64,
        op: Operation,
        allowed: &[NodeStatus],
    ) -> Result<(NodeGuard, Node)> {
        let node = self.get_node(id)?;
        ensure_allowed(&node, op, allowed)?;

        let guard = match self.inner.locks.claim_lifecycle(id, op).await {
            Ok(guard) => guard,
            Err(other) => {
                let node = self.get_node(id)?;
                tracing::debug!(node = id, operation = %op, holder = %other, "Node busy");
                return Err(invalid_transition(
                    &node,
                    op,
                    Some(Holder::Lifecycle(other).to_string()),
                ));
            }
        };

        let node = self.get_node(id)?;
        ensure_allowed(&node, op, allowed)?;
        Ok((guard, node))
    }

    /// Record a runtime failure: node to `error`, reference cleared, `error` event
    fn fail(&self, id: i64, from: NodeStatus, op: Operation, err: RuntimeError) -> Error {
        tracing::error!(node = id, operation = %op, from = %from, error = %err, "Runtime call failed");
        let transition = Transition::new(id, from, NodeStatus::Error)
            .clear_container()
            .with_error(err.to_string())
            .with_event(EventKind::Error, format!("{} failed: {}", op, err));
        match self.inner.store.transition(&transition) {
            Ok(_) => Error::Runtime(err),
            Err(store_err) => {
                tracing::error!(
                    node = id,
                    status = %from,
                    error = %store_err,
                    "Failed to record error status, node stays transient until recover_interrupted"
                );
                Error::Store(format!(
                    "{} failed ({}) and node {} could not be moved to error: {}",
                    op, err, id, store_err
                ))
            }
        }
    }
}

fn ensure_allowed(node: &Node, op: Operation, allowed: &[NodeStatus]) -> Result<()> {
    if allowed.contains(&node.status) {
        Ok(())
    } else {
        Err(invalid_transition(node, op, None))
    }
}

fn invalid_transition(node: &Node, operation: Operation, detail: Option<String>) -> Error {
    Error::InvalidTransition {
        node: node.id,
        current: node.status,
        operation,
        detail,
    }
}

fn validate_request(req: &CreateNodeRequest) -> Result<()> {
    if !NODE_NAME.is_match(&req.name) {
        return Err(Error::Validation(format!("invalid node name: {:?}", req.name)));
    }
    if !IMAGE_REF.is_match(&req.image) {
        return Err(Error::Validation(format!(
            "invalid image reference: {:?}",
            req.image
        )));
    }
    if req.staking_port == 0 {
        return Err(Error::Validation("staking_port cannot be 0".into()));
    }
    let mut networks = HashSet::new();
    for l1 in &req.l1s {
        if l1.network_id.trim().is_empty() {
            return Err(Error::Validation("network_id cannot be empty".into()));
        }
        if !networks.insert(l1.network_id.as_str()) {
            return Err(Error::Validation(format!(
                "duplicate L1 binding {}",
                l1.network_id
            )));
        }
    }
    Ok(())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub(crate) async fn with_deadline<T>(
    operation: &str,
    after: Duration,
    call: impl Future<Output = RuntimeResult<T>>,
) -> RuntimeResult<T> {
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

/// Run a mutating operation on its own task so a dropped caller cannot abandon it
async fn run_to_completion<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::Runtime(RuntimeError::Unavailable(format!(
            "operation aborted: {}",
            e
        )))),
    }
}
