use std::sync::Arc;

use async_trait::async_trait;
use htap_common::{ShardId, Timestamp, TxnId};
use htap_common::TxnError;

use crate::coordinator::CoordinatorShard;

/// The internal 2PC RPC surface to one peer shard (`§6`): `Prepare`,
/// `CommitShard`, `RollbackShard`. A real deployment implements this over
/// a network transport; [`LoopbackPeer`] implements it for shards
/// colocated in the same process.
#[async_trait]
pub trait ShardPeer: Send + Sync {
    fn shard_id(&self) -> ShardId;
    async fn prepare(&self, txn: TxnId) -> Result<Timestamp, TxnError>;
    async fn commit_shard(&self, txn: TxnId, commit_ts: Timestamp) -> Result<(), TxnError>;
    async fn rollback_shard(&self, txn: TxnId) -> Result<(), TxnError>;
}

/// An in-process peer: calls straight into another [`CoordinatorShard`]'s
/// internal methods, skipping serialization entirely.
pub struct LoopbackPeer {
    target: Arc<CoordinatorShard>,
}

impl LoopbackPeer {
    pub fn new(target: Arc<CoordinatorShard>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl ShardPeer for LoopbackPeer {
    fn shard_id(&self) -> ShardId {
        self.target.shard_id()
    }

    async fn prepare(&self, txn: TxnId) -> Result<Timestamp, TxnError> {
        self.target.prepare_internal(&txn).await
    }

    async fn commit_shard(&self, txn: TxnId, commit_ts: Timestamp) -> Result<(), TxnError> {
        self.target.commit_shard_internal(&txn, commit_ts).await
    }

    async fn rollback_shard(&self, txn: TxnId) -> Result<(), TxnError> {
        self.target.rollback_shard_internal(&txn).await
    }
}
