use htap_common::{Timestamp, Txn, TxnError, TxnId, TxnStatus};
use tokio::sync::{watch, RwLock};

/// Per-shard, per-active-txn state (`§3`). The `tokio::sync::RwLock`
/// serializes Read/Write (readers) against Commit/Rollback (the
/// writer); the `watch` channel is the wait-for-decision mechanism
/// (`§5`) — race-free, unlike a bare `Notify`, since a late subscriber
/// still observes the last-sent status.
pub struct TxnContext {
    txn: RwLock<Txn>,
    status_tx: watch::Sender<TxnStatus>,
    status_rx: watch::Receiver<TxnStatus>,
}

impl TxnContext {
    pub fn new(id: TxnId, start_ts: Timestamp) -> Self {
        let (status_tx, status_rx) = watch::channel(TxnStatus::Active);
        Self {
            txn: RwLock::new(Txn::new(id, start_ts)),
            status_tx,
            status_rx,
        }
    }

    /// Fails fast (does not block) if an exclusive (Commit/Rollback) lock
    /// is already held, per `§4.1` Write's "lock already held exclusively
    /// -> TxnNotActive" contract. `id` is only used to shape the error.
    pub fn try_read(&self, id: &TxnId) -> Result<tokio::sync::RwLockReadGuard<'_, Txn>, TxnError> {
        self.txn.try_read().map_err(|_| TxnError::TxnNotActive(id.clone()))
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Txn> {
        self.txn.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Txn> {
        self.txn.write().await
    }

    /// Applies a status transition and publishes it to any waiter.
    pub async fn transition(&self, next: TxnStatus) -> Result<(), TxnError> {
        let mut guard = self.txn.write().await;
        guard.transition(next)?;
        let status = guard.status;
        drop(guard);
        let _ = self.status_tx.send(status);
        Ok(())
    }

    /// Blocks until this txn reaches a terminal status (`§4.1` Read).
    pub async fn wait_for_decision(&self) -> TxnStatus {
        let mut rx = self.status_rx.clone();
        loop {
            if rx.borrow().is_terminal() {
                return *rx.borrow();
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}
