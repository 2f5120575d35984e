use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use htap_common::{Clock, ShardId, Timestamp, TxnError, TxnId, TxnStatus};
use htap_logclient::LogServiceClient;
use htap_mvcc::MvccStore;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::ShardConfig;
use crate::peer::ShardPeer;
use crate::storage_op::{StorageOp, StorageResult, TxnHeader};
use crate::txn_context::TxnContext;

/// Per-shard transaction coordinator (`C1`, `§4.1`). Exposes
/// `Read`/`Write`/`Commit`/`Rollback` to clients and
/// `Prepare`/`CommitShard`/`RollbackShard` to peers, driving 2PC across
/// the shards a transaction touched.
pub struct CoordinatorShard {
    shard_id: ShardId,
    config: ShardConfig,
    store: Arc<MvccStore>,
    log: AsyncMutex<LogServiceClient>,
    clock: Arc<dyn Clock>,
    registry: SyncMutex<HashMap<TxnId, Arc<TxnContext>>>,
    peers: SyncMutex<HashMap<ShardId, Arc<dyn ShardPeer>>>,
    /// Tied to this shard's own lifetime; cancelling it is the signal
    /// every background fan-out and retry loop watches to stop starting
    /// new attempts (`§5`/`§9`).
    shutdown: CancellationToken,
}

impl CoordinatorShard {
    pub fn new(
        shard_id: ShardId,
        config: ShardConfig,
        store: Arc<MvccStore>,
        log: LogServiceClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shard_id,
            config,
            store,
            log: AsyncMutex::new(log),
            clock,
            registry: SyncMutex::new(HashMap::new()),
            peers: SyncMutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn store(&self) -> &Arc<MvccStore> {
        &self.store
    }

    /// Signals every in-flight retry loop and background fan-out task to
    /// stop starting new attempts once their current one completes
    /// (`§5`'s shutdown guarantee). Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wired in after construction, once peer `CoordinatorShard`s (or
    /// remote handles) exist (`§4.1`/`§6`).
    pub fn set_peer(&self, peer: Arc<dyn ShardPeer>) {
        self.peers.lock().insert(peer.shard_id(), peer);
    }

    fn context_or_register(&self, header: &TxnHeader) -> Arc<TxnContext> {
        let mut registry = self.registry.lock();
        registry
            .entry(header.id.clone())
            .or_insert_with(|| Arc::new(TxnContext::new(header.id.clone(), header.start_ts)))
            .clone()
    }

    fn context(&self, id: &TxnId) -> Result<Arc<TxnContext>, TxnError> {
        self.registry.lock().get(id).cloned().ok_or_else(|| TxnError::TxnNotFound(id.clone()))
    }

    /// `§4.1` Read: snapshot-consistent; `txn` need not be registered
    /// locally. Visibility waits (for a concurrently-committing node)
    /// happen inside `htap-mvcc` itself. Only the read-shaped ops are
    /// legal here; mutations go through [`Self::write`].
    #[instrument(skip(self, op), fields(shard = %self.shard_id, txn = %header.id))]
    pub async fn read(&self, header: TxnHeader, op: StorageOp) -> Result<StorageResult, TxnError> {
        match op {
            StorageOp::ReadRow { block, pos } => {
                let value = self.store.read_row(header.start_ts, block, pos)?;
                Ok(StorageResult::Value(value))
            }
            StorageOp::GetByFilter { block, pk } => {
                let row = self.store.get_by_filter(header.start_ts, block, &pk).await?;
                Ok(StorageResult::Row(row))
            }
            StorageOp::Append { .. } | StorageOp::RangeDelete { .. } => {
                Err(TxnError::InvalidInput("mutation submitted to Read".to_string()))
            }
        }
    }

    /// `§4.1` Write: registers the txn on first call, fails fast with
    /// `TxnNotActive` if Commit/Rollback currently holds the exclusive
    /// lock or the txn has already left `Active`.
    #[instrument(skip(self, op), fields(shard = %self.shard_id, txn = %header.id))]
    pub async fn write(&self, header: TxnHeader, op: StorageOp) -> Result<StorageResult, TxnError> {
        let ctx = self.context_or_register(&header);
        {
            let guard = ctx.try_read(&header.id)?;
            if guard.status != TxnStatus::Active {
                return Err(TxnError::TxnNotActive(header.id.clone()));
            }
        }
        {
            let mut guard = ctx.write().await;
            guard.touch_shard(self.shard_id);
        }

        match op {
            StorageOp::Append { block, rows } => {
                let positions = self.store.append(header.id.clone(), header.start_ts, block, rows)?;
                Ok(StorageResult::Rows(positions))
            }
            StorageOp::RangeDelete { block, positions } => {
                self.store.range_delete(header.id.clone(), header.start_ts, block, positions)?;
                Ok(StorageResult::Ack)
            }
            StorageOp::ReadRow { .. } | StorageOp::GetByFilter { .. } => {
                Err(TxnError::InvalidInput("read submitted to Write".to_string()))
            }
        }
    }

    /// `§4.1` Commit. The caller (the client library, which is the only
    /// party that knows every shard a txn touched) supplies the full
    /// participant set. Single-shard txns take the fast path; multi-shard
    /// txns run full 2PC, returning to the caller once the txn is
    /// durably marked Committing and handing the durability fence plus
    /// peer fan-out to a background task.
    #[instrument(skip(self, participants), fields(shard = %self.shard_id, txn = %txn_id))]
    pub async fn commit(self: &Arc<Self>, txn_id: TxnId, participants: Vec<ShardId>) -> Result<(), TxnError> {
        if participants.is_empty() {
            return Err(TxnError::InvalidInput("commit with no participating shards".to_string()));
        }
        let ctx = self.context(&txn_id)?;
        {
            let mut guard = ctx.write().await;
            guard.shards = participants.clone();
        }

        if participants.len() == 1 && participants[0] == self.shard_id {
            return self.commit_fast_path(&txn_id, &ctx).await;
        }
        self.commit_slow_path(txn_id, ctx, participants).await
    }

    async fn commit_fast_path(&self, txn_id: &TxnId, ctx: &Arc<TxnContext>) -> Result<(), TxnError> {
        let commit_ts = self.clock.now();
        ctx.transition(TxnStatus::Committing).await?;
        self.store.commit(txn_id, commit_ts);
        ctx.transition(TxnStatus::Committed).await
    }

    async fn commit_slow_path(
        self: &Arc<Self>,
        txn_id: TxnId,
        ctx: Arc<TxnContext>,
        shards: Vec<ShardId>,
    ) -> Result<(), TxnError> {
        let prepare_results = join_all(shards.iter().map(|shard| {
            let txn_id = txn_id.clone();
            async move {
                let result = if *shard == self.shard_id {
                    self.prepare_internal(&txn_id).await
                } else {
                    match self.peers.lock().get(shard).cloned() {
                        Some(peer) => peer.prepare(txn_id).await,
                        None => Err(TxnError::ShardNotFound(*shard)),
                    }
                };
                (*shard, result)
            }
        }))
        .await;

        let mut commit_ts = Timestamp::ZERO;
        for (shard, result) in &prepare_results {
            match result {
                Ok(prepared_ts) => commit_ts = commit_ts.max(*prepared_ts),
                Err(e) => {
                    warn!(shard = %shard, error = %e, "prepare failed, aborting");
                    ctx.transition(TxnStatus::Aborted).await.ok();
                    self.spawn_rollback_fanout(txn_id.clone(), shards.clone());
                    return Err(e.clone());
                }
            }
        }

        ctx.transition(TxnStatus::Committing).await?;
        {
            let mut guard = ctx.write().await;
            guard.commit_ts = Some(commit_ts);
        }

        self.spawn_commit_fanout(txn_id, ctx, shards, commit_ts);
        Ok(())
    }

    fn spawn_commit_fanout(
        self: &Arc<Self>,
        txn_id: TxnId,
        ctx: Arc<TxnContext>,
        shards: Vec<ShardId>,
        commit_ts: Timestamp,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            this.persist_committing_intent(&txn_id, commit_ts).await;

            let peers: Vec<Arc<dyn ShardPeer>> = {
                let registered = this.peers.lock();
                shards
                    .iter()
                    .filter(|s| **s != this.shard_id)
                    .filter_map(|s| registered.get(s).cloned())
                    .collect()
            };
            for peer in peers {
                this.commit_shard_with_retry(peer, txn_id.clone(), commit_ts).await;
            }

            this.store.commit(&txn_id, commit_ts);
            if let Err(e) = ctx.transition(TxnStatus::Committed).await {
                error!(txn = %txn_id, error = %e, "fatal: local commit finalize failed after durable Committing intent");
                panic!("durability invariant violated finalizing commit for {txn_id}: {e}");
            }
            info!(txn = %txn_id, "commit finalized on all shards");
        });
    }

    fn spawn_rollback_fanout(self: &Arc<Self>, txn_id: TxnId, shards: Vec<ShardId>) {
        let this = self.clone();
        tokio::spawn(async move {
            let peers: Vec<Arc<dyn ShardPeer>> = {
                let registered = this.peers.lock();
                shards
                    .iter()
                    .filter(|s| **s != this.shard_id)
                    .filter_map(|s| registered.get(s).cloned())
                    .collect()
            };
            this.store.rollback(&txn_id);
            for peer in peers {
                this.rollback_shard_with_retry(peer, txn_id.clone()).await;
            }
        });
    }

    /// Sleeps for `backoff`, but cuts the sleep short if shutdown is
    /// signaled. Returns whether the wait ran to completion — `false`
    /// means the caller's retry loop should stop rather than attempt
    /// again (`§5`: in-flight attempts finish, but no new retries start).
    async fn wait_for_retry(&self, backoff_ms: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// `§4.1` step 6: the durability fence. Retries forever with backoff
    /// on transient log-service errors, unless shutdown is signaled.
    async fn persist_committing_intent(&self, txn_id: &TxnId, commit_ts: Timestamp) {
        let mut backoff = self.config.commit_retry_backoff_ms;
        let payload = format!("committing:{txn_id}:{}", commit_ts.0).into_bytes();
        loop {
            let result = self.log.lock().await.append(&payload).await;
            match result {
                Ok(lsn) => {
                    info!(txn = %txn_id, lsn = %lsn, "committing intent durable");
                    return;
                }
                Err(e) => {
                    warn!(txn = %txn_id, error = %e, backoff_ms = backoff, "retrying durability fence");
                    if !self.wait_for_retry(backoff).await {
                        warn!(txn = %txn_id, "shutdown signaled, abandoning durability fence retry");
                        return;
                    }
                    backoff = (backoff * 2).min(self.config.commit_retry_backoff_max_ms);
                }
            }
        }
    }

    async fn commit_shard_with_retry(&self, peer: Arc<dyn ShardPeer>, txn_id: TxnId, commit_ts: Timestamp) {
        let mut backoff = self.config.commit_retry_backoff_ms;
        loop {
            match peer.commit_shard(txn_id.clone(), commit_ts).await {
                Ok(()) => return,
                Err(e) if e.is_idempotent_not_found() => return,
                Err(e) => {
                    warn!(shard = %peer.shard_id(), txn = %txn_id, error = %e, "retrying CommitShard");
                    if !self.wait_for_retry(backoff).await {
                        warn!(shard = %peer.shard_id(), txn = %txn_id, "shutdown signaled, abandoning CommitShard retry");
                        return;
                    }
                    backoff = (backoff * 2).min(self.config.commit_retry_backoff_max_ms);
                }
            }
        }
    }

    async fn rollback_shard_with_retry(&self, peer: Arc<dyn ShardPeer>, txn_id: TxnId) {
        let mut backoff = self.config.commit_retry_backoff_ms;
        loop {
            match peer.rollback_shard(txn_id.clone()).await {
                Ok(()) => return,
                Err(e) if e.is_idempotent_not_found() => return,
                Err(e) => {
                    warn!(shard = %peer.shard_id(), txn = %txn_id, error = %e, "retrying RollbackShard");
                    if !self.wait_for_retry(backoff).await {
                        warn!(shard = %peer.shard_id(), txn = %txn_id, "shutdown signaled, abandoning RollbackShard retry");
                        return;
                    }
                    backoff = (backoff * 2).min(self.config.commit_retry_backoff_max_ms);
                }
            }
        }
    }

    /// `§4.1` Rollback: exclusive lock, idempotent on an already-aborted
    /// txn, fans `RollbackShard` out to every participant the caller
    /// names (the shards written so far; may be a subset of a txn that
    /// never reached Commit).
    #[instrument(skip(self, participants), fields(shard = %self.shard_id, txn = %txn_id))]
    pub async fn rollback(self: &Arc<Self>, txn_id: TxnId, participants: Vec<ShardId>) -> Result<(), TxnError> {
        let ctx = self.context(&txn_id)?;
        {
            let guard = ctx.read().await;
            if guard.status == TxnStatus::Aborted {
                return Ok(());
            }
        }
        ctx.transition(TxnStatus::Aborted).await?;
        self.store.rollback(&txn_id);
        self.spawn_rollback_fanout(txn_id, participants);
        Ok(())
    }

    /// `§6` internal Prepare: idempotent, returns the cached
    /// `prepared_ts` on repeated calls.
    pub async fn prepare_internal(&self, txn_id: &TxnId) -> Result<Timestamp, TxnError> {
        let ctx = self.context(txn_id)?;
        {
            let guard = ctx.read().await;
            if let Some(ts) = guard.prepared_ts {
                return Ok(ts);
            }
        }
        let prepared_ts = self.store.prepare(txn_id)?;
        let mut guard = ctx.write().await;
        guard.prepared_ts = Some(prepared_ts);
        Ok(prepared_ts)
    }

    /// `§6` internal CommitShard: `TxnNotFound` is idempotent success.
    /// The peer's own txn never went through `commit`/`commit_fast_path`,
    /// so it is still `Active` here; step through `Committing` first so
    /// the state machine (`§3`/`§4.1`) stays consistent on every shard,
    /// not just the coordinating one.
    pub async fn commit_shard_internal(&self, txn_id: &TxnId, commit_ts: Timestamp) -> Result<(), TxnError> {
        let ctx = match self.context(txn_id) {
            Ok(ctx) => ctx,
            Err(e) if e.is_idempotent_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        match ctx.transition(TxnStatus::Committing).await {
            Ok(()) | Err(TxnError::InvalidTransition { .. }) => {}
            Err(e) => return Err(e),
        }
        self.store.commit(txn_id, commit_ts);
        match ctx.transition(TxnStatus::Committed).await {
            Ok(()) | Err(TxnError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `§6` internal RollbackShard: `TxnNotFound` is idempotent success.
    pub async fn rollback_shard_internal(&self, txn_id: &TxnId) -> Result<(), TxnError> {
        let ctx = match self.context(txn_id) {
            Ok(ctx) => ctx,
            Err(e) if e.is_idempotent_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.store.rollback(txn_id);
        match ctx.transition(TxnStatus::Aborted).await {
            Ok(()) | Err(TxnError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
