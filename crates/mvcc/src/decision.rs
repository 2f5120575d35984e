use htap_common::Timestamp;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// The commit outcome of one append/delete node. Readers that land on an
/// uncommitted node at or below their snapshot `start_ts` must wait here
/// for the owning txn to reach a terminal state (`§4.2` point lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uncommitted,
    Committed(Timestamp),
    Aborted,
}

/// Shared between a node and whatever woke it up at Commit/Rollback time.
/// Mirrors the coordinator's own wait-for-decision mechanism but scoped to
/// a single append or delete node rather than a whole txn.
#[derive(Debug)]
pub struct Decision {
    state: Mutex<NodeState>,
    notify: Notify,
}

impl Decision {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Uncommitted),
            notify: Notify::new(),
        }
    }

    pub fn peek(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn resolve(&self, outcome: NodeState) {
        *self.state.lock() = outcome;
        self.notify.notify_waiters();
    }

    /// Blocks until the node has a terminal outcome. Cheap in the common
    /// case: if the decision already landed, returns immediately without
    /// registering on the `Notify`.
    pub async fn wait(&self) -> NodeState {
        loop {
            let state = *self.state.lock();
            if !matches!(state, NodeState::Uncommitted) {
                return state;
            }
            let notified = self.notify.notified();
            // Re-check under the lock before awaiting so a `resolve` racing
            // between the first read and here isn't missed.
            if !matches!(*self.state.lock(), NodeState::Uncommitted) {
                continue;
            }
            notified.await;
        }
    }
}

impl Default for Decision {
    fn default() -> Self {
        Self::new()
    }
}
