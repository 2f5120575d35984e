use htap_common::{BlockId, Timestamp, TxnId};
use htap_mvcc::PkValue;

/// The txn header carried on every external request (`§6`): identity and
/// the snapshot timestamp the client is operating under. `shards` and
/// `status` are server-owned and tracked in the registered [`Txn`],
/// not repeated by the caller on every call.
///
/// [`Txn`]: htap_common::Txn
#[derive(Debug, Clone)]
pub struct TxnHeader {
    pub id: TxnId,
    pub start_ts: Timestamp,
}

/// A concrete storage-level operation. SQL parsing/planning and query
/// execution are out of scope (`§1`); this is the storage contract
/// `Read`/`Write`'s opaque method-specific body resolves to in this
/// implementation.
#[derive(Debug, Clone)]
pub enum StorageOp {
    Append { block: BlockId, rows: Vec<(PkValue, Vec<u8>)> },
    RangeDelete { block: BlockId, positions: Vec<u64> },
    ReadRow { block: BlockId, pos: u64 },
    GetByFilter { block: BlockId, pk: PkValue },
}

/// A storage-level result, mirrored back through the RPC boundary as
/// opaque bytes in the real wire protocol; kept structured here since
/// this crate owns both ends of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageResult {
    Rows(Vec<u64>),
    Value(Option<Vec<u8>>),
    Row(Option<(u64, Vec<u8>)>),
    Ack,
}
