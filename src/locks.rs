//! Per-node mutual exclusion
//!
//! At most one mutating operation runs against a node at a time. Lifecycle
//! operations fail fast when another lifecycle operation holds the node, but
//! wait out the reconciler, whose hold is bounded by the runtime deadline.
//! The reconciler never waits: it skips nodes that are busy.

use crate::models::Operation;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Who currently holds a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Lifecycle(Operation),
    Reconciler,
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Holder::Lifecycle(op) => write!(f, "{} in progress", op),
            Holder::Reconciler => write!(f, "reconciliation in progress"),
        }
    }
}

#[derive(Default)]
struct NodeSlot {
    holder: Mutex<Option<Holder>>,
    released: Notify,
}

/// Lock map keyed by node id. Slots are created on first use and kept.
#[derive(Default)]
pub struct NodeLocks {
    slots: RwLock<HashMap<i64, Arc<NodeSlot>>>,
}

/// Exclusive claim on a node, released on drop
pub struct NodeGuard {
    node: i64,
    slot: Arc<NodeSlot>,
}

impl NodeGuard {
    pub fn node(&self) -> i64 {
        self.node
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        *self.slot.holder.lock() = None;
        self.slot.released.notify_waiters();
    }
}

impl std::fmt::Debug for NodeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGuard").field("node", &self.node).finish()
    }
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, node: i64) -> Arc<NodeSlot> {
        if let Some(slot) = self.slots.read().get(&node) {
            return slot.clone();
        }
        self.slots.write().entry(node).or_default().clone()
    }

    /// Current holder, if any
    pub fn holder(&self, node: i64) -> Option<Holder> {
        self.slots
            .read()
            .get(&node)
            .and_then(|slot| *slot.holder.lock())
    }

    /// Claim without waiting; on contention returns who holds the node
    pub fn try_claim(&self, node: i64, holder: Holder) -> Result<NodeGuard, Holder> {
        let slot = self.slot(node);
        let mut current = slot.holder.lock();
        if let Some(existing) = *current {
            return Err(existing);
        }
        *current = Some(holder);
        drop(current);
        Ok(NodeGuard { node, slot })
    }

    /// Claim for a lifecycle operation.
    ///
    /// Waits while the reconciler holds the node. Returns the competing
    /// operation if another lifecycle operation holds it.
    pub async fn claim_lifecycle(&self, node: i64, op: Operation) -> Result<NodeGuard, Operation> {
        let slot = self.slot(node);
        loop {
            let notified = slot.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between check and await is not lost
            notified.as_mut().enable();

            {
                let mut current = slot.holder.lock();
                match *current {
                    None => {
                        *current = Some(Holder::Lifecycle(op));
                        return Ok(NodeGuard {
                            node,
                            slot: slot.clone(),
                        });
                    }
                    Some(Holder::Lifecycle(other)) => return Err(other),
                    Some(Holder::Reconciler) => {}
                }
            }

            tracing::debug!(node = node, operation = %op, "Waiting for reconciler to release node");
            notified.await;
        }
    }

    /// Number of nodes that have ever been claimed
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
