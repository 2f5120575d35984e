use htap_common::{BlockId, TxnError, TxnId};
use thiserror::Error;

/// Error taxonomy for the storage core (`§4.2`/`§7`). Converts into
/// [`TxnError`] at the point where a block operation crosses into the
/// coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MvccError {
    #[error("block {0:?} not found")]
    BlockNotFound(BlockId),

    #[error("block {0:?} is frozen")]
    BlockFrozen(BlockId),

    #[error("block {0:?} is full")]
    BlockFull(BlockId),

    #[error("duplicate key")]
    Duplicate,

    #[error("write-write conflict on txn {0}")]
    WwConflict(TxnId),

    #[error("txn {0} is not active on this block")]
    TxnNotActive(TxnId),

    #[error("key not found")]
    NotFound,

    #[error("read error: {0}")]
    ReadError(String),

    #[error("invalid row range")]
    InvalidRange,

    #[error("append is not legal on a non-appendable block")]
    NotAppendable,

    #[error("block {0:?} is still referenced by a live appender")]
    BlockReferenced(BlockId),
}

impl From<MvccError> for TxnError {
    fn from(e: MvccError) -> Self {
        match e {
            MvccError::BlockNotFound(_) | MvccError::NotFound => TxnError::NotFound,
            MvccError::Duplicate => TxnError::Duplicate,
            MvccError::WwConflict(txn) => TxnError::WwConflict(txn),
            MvccError::TxnNotActive(txn) => TxnError::TxnNotActive(txn),
            MvccError::ReadError(msg) => TxnError::ReadError(msg),
            MvccError::BlockFrozen(_)
            | MvccError::BlockFull(_)
            | MvccError::InvalidRange
            | MvccError::NotAppendable
            | MvccError::BlockReferenced(_) => TxnError::WriteError(e.to_string()),
        }
    }
}
