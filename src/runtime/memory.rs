//! In-process runtime
//!
//! Keeps containers in memory and lets callers inject failures and hangs per
//! operation, or mutate containers out-of-band the way a crashed or manually
//! removed container would look to the manager.

use super::{
    split_label_filter, ContainerRuntime, ContainerSpec, ContainerStatus, LogOptions, LogStream, LogTail,
    RuntimeError, RuntimeResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Runtime operations, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Remove,
    RemoveVolume,
    Inspect,
    Logs,
    FindByLabel,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(RuntimeError),
    Hang,
}

#[derive(Debug, Clone)]
struct MemContainer {
    name: String,
    labels: HashMap<String, String>,
    running: bool,
    volumes: Vec<String>,
    logs: Vec<Bytes>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, MemContainer>,
    volumes: HashSet<String>,
    faults: HashMap<RuntimeOp, VecDeque<Fault>>,
    calls: HashMap<RuntimeOp, usize>,
    exit_on_start: bool,
    latency: Duration,
}

/// Container runtime that lives entirely in memory
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: RuntimeOp, error: RuntimeError) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(Fault::Fail(error));
    }

    /// Make the next call of `op` never complete
    pub fn hang_next(&self, op: RuntimeOp) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(Fault::Hang);
    }

    /// Delay every call, so operations overlap the way they do against a real engine
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Containers exit right after starting, as a crashing workload would
    pub fn set_exit_on_start(&self, exit: bool) {
        self.state.lock().exit_on_start = exit;
    }

    /// Out-of-band: the container died
    pub fn kill(&self, id: &str) -> bool {
        match self.state.lock().containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                true
            }
            None => false,
        }
    }

    /// Out-of-band: the container was started by someone else
    pub fn revive(&self, id: &str) -> bool {
        match self.state.lock().containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                true
            }
            None => false,
        }
    }

    /// Out-of-band: the container was removed by someone else
    pub fn purge(&self, id: &str) -> bool {
        self.state.lock().containers.remove(id).is_some()
    }

    pub fn push_log(&self, id: &str, line: impl Into<Bytes>) -> bool {
        match self.state.lock().containers.get_mut(id) {
            Some(c) => {
                c.logs.push(line.into());
                true
            }
            None => false,
        }
    }

    pub fn status_of(&self, id: &str) -> ContainerStatus {
        match self.state.lock().containers.get(id) {
            Some(c) if c.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Exited,
            None => ContainerStatus::Missing,
        }
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn container_name(&self, id: &str) -> Option<String> {
        self.state.lock().containers.get(id).map(|c| c.name.clone())
    }

    pub fn volume_exists(&self, volume: &str) -> bool {
        self.state.lock().volumes.contains(volume)
    }

    pub fn call_count(&self, op: RuntimeOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Record the call and pop a pending fault for it
    async fn enter(&self, op: RuntimeOp) -> RuntimeResult<()> {
        let (fault, latency) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            (state.faults.get_mut(&op).and_then(|q| q.pop_front()), state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match fault {
            None => Ok(()),
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::Hang) => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.enter(RuntimeOp::Create).await?;
        let mut state = self.state.lock();
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Api(format!(
                "conflict: container name {} already in use",
                spec.name
            )));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        let volumes: Vec<String> = spec.volumes.iter().map(|v| v.volume.clone()).collect();
        state.volumes.extend(volumes.iter().cloned());
        state.containers.insert(
            id.clone(),
            MemContainer {
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                running: false,
                volumes,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.enter(RuntimeOp::Start).await?;
        let mut state = self.state.lock();
        let exit_on_start = state.exit_on_start;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = !exit_on_start;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        self.enter(RuntimeOp::Stop).await?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> RuntimeResult<()> {
        self.enter(RuntimeOp::Remove).await?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .remove(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if remove_volumes {
            for volume in &container.volumes {
                state.volumes.remove(volume);
            }
        }
        Ok(())
    }

    async fn inspect_status(&self, id: &str) -> RuntimeResult<ContainerStatus> {
        self.enter(RuntimeOp::Inspect).await?;
        Ok(self.status_of(id))
    }

    async fn stream_logs(&self, id: &str, options: &LogOptions) -> RuntimeResult<LogStream> {
        self.enter(RuntimeOp::Logs).await?;
        let lines = {
            let state = self.state.lock();
            let container = state
                .containers
                .get(id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            let skip = match options.tail {
                LogTail::All => 0,
                LogTail::Last(n) => container.logs.len().saturating_sub(n),
            };
            container.logs[skip..].to_vec()
        };

        let finite = futures::stream::iter(lines.into_iter().map(Ok));
        if options.follow {
            Ok(finite.chain(futures::stream::pending()).boxed())
        } else {
            Ok(finite.boxed())
        }
    }

    async fn remove_volume(&self, name: &str) -> RuntimeResult<()> {
        self.enter(RuntimeOp::RemoveVolume).await?;
        self.state.lock().volumes.remove(name);
        Ok(())
    }

    async fn find_by_labels(&self, filters: &[String]) -> RuntimeResult<Option<String>> {
        self.enter(RuntimeOp::FindByLabel).await?;
        let state = self.state.lock();
        let mut matches: Vec<&String> = state
            .containers
            .iter()
            .filter(|(_, c)| {
                filters.iter().all(|filter| match split_label_filter(filter) {
                    (key, Some(value)) => c.labels.get(key).map(String::as_str) == Some(value),
                    (key, None) => c.labels.contains_key(key),
                })
            })
            .map(|(id, _)| id)
            .collect();
        matches.sort();
        Ok(matches.first().map(|id| id.to_string()))
    }
}
