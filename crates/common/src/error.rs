use crate::{ShardId, TxnId, TxnStatus};
use thiserror::Error;

/// The error taxonomy at the coordinator's external and internal RPC
/// boundary (`§6`/`§7`). Storage (`htap-mvcc`) and the log client
/// (`htap-logclient`) each have their own narrower error enums and
/// convert into this one at the point where they cross into the
/// coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("txn {0} not found")]
    TxnNotFound(TxnId),

    #[error("txn {0} is not active")]
    TxnNotActive(TxnId),

    #[error("write-write conflict on txn {0}")]
    WwConflict(TxnId),

    #[error("duplicate key")]
    Duplicate,

    #[error("not found")]
    NotFound,

    #[error("read error: {0}")]
    ReadError(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("rpc error talking to {shard}: {message}")]
    Rpc { shard: ShardId, message: String },

    #[error("log service not ready: {0}")]
    LogServiceNotReady(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("shard {0} not found")]
    ShardNotFound(ShardId),

    #[error("illegal txn state transition from {from:?} to {to:?}")]
    InvalidTransition { from: TxnStatus, to: TxnStatus },
}

impl TxnError {
    /// Errors the coordinator is allowed to retry on its own, as opposed
    /// to surfacing immediately to the client (`§7`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxnError::ShardNotFound(_) | TxnError::LogServiceNotReady(_))
    }

    /// `CommitShard`/`RollbackShard` treat "the peer doesn't know this txn"
    /// as idempotent success, since the peer may have already applied it.
    pub fn is_idempotent_not_found(&self) -> bool {
        matches!(self, TxnError::TxnNotFound(_))
    }
}
