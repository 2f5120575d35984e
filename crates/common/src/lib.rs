//! Shared identifiers and transaction state used by the coordinator, the
//! MVCC storage core, and the log service client.

mod clock;
mod error;
mod ids;
mod txn;

pub use clock::{Clock, LocalClock};
pub use error::TxnError;
pub use ids::{BlockId, Lsn, ReplicaId, ShardId, Timestamp, TxnId};
pub use txn::{Txn, TxnStatus};
