use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use htap_common::{BlockId, Timestamp, TxnId};

use crate::decision::{Decision, NodeState};

/// Opaque primary-key value. Multi-column layout and typed column data are
/// out of scope (`§1` non-goals: disk layout of columnar blocks); rows
/// carry one opaque value blob addressed by an opaque key.
pub type PkValue = Vec<u8>;

/// One transaction's append into a block (`§3`). `start_row..max_row` is
/// the contiguous range of row positions it owns.
pub struct AppendNode {
    pub txn: TxnId,
    pub start_row: u64,
    pub max_row: u64,
    pub decision: Arc<Decision>,
}

impl AppendNode {
    /// A row is visible at `ts` if this node committed at or before `ts`.
    pub fn is_visible_at(&self, ts: Timestamp) -> bool {
        matches!(self.decision.peek(), NodeState::Committed(commit_ts) if commit_ts <= ts)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.decision.peek(), NodeState::Aborted)
    }

    pub fn contains_row(&self, row: u64) -> bool {
        row >= self.start_row && row < self.max_row
    }
}

/// One transaction's range-delete over row positions in a block (`§3`).
pub struct DeleteNode {
    pub txn: TxnId,
    pub rows: BTreeSet<u64>,
    pub decision: Arc<Decision>,
}

impl DeleteNode {
    pub fn is_visible_at(&self, ts: Timestamp) -> bool {
        matches!(self.decision.peek(), NodeState::Committed(commit_ts) if commit_ts <= ts)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.decision.peek(), NodeState::Aborted)
    }
}

/// A row's content, addressed by its physical position within a block.
/// Deletes against `NonAppendable` blocks live in a separate delta-delete
/// stream rather than mutating the row itself.
#[derive(Debug, Clone)]
pub struct Row {
    pub pos: u64,
    pub pk: PkValue,
    pub value: Vec<u8>,
}

/// A delete recorded against a compacted (`NonAppendable`) block.
#[derive(Debug, Clone)]
pub struct DeltaDelete {
    pub row: u64,
    pub commit_ts: Timestamp,
}

/// Primary-key index for an Appendable block: key -> every row position
/// ever assigned that key, oldest first. Entries are never removed on
/// delete; visibility is resolved at read time via the owning node's
/// commit state (`§3`).
#[derive(Default)]
pub struct PkIndex {
    entries: HashMap<PkValue, Vec<u64>>,
}

impl PkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidates(&self, pk: &[u8]) -> &[u64] {
        self.entries.get(pk).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, pk: PkValue, row: u64) {
        self.entries.entry(pk).or_default().push(row);
    }
}

/// An in-memory, append-accepting block (`§3`).
pub struct AppendableBlock {
    pub id: BlockId,
    pub max_rows: u64,
    pub frozen: bool,
    pub row_count: u64,
    pub appends: Vec<AppendNode>,
    pub deletes: Vec<DeleteNode>,
    pub pk_index: PkIndex,
    pub rows: Vec<Row>,
    /// Live appender handles; compaction refuses to start while this is
    /// non-zero (`§3` block lifecycle invariant).
    pub appender_refs: u64,
}

impl AppendableBlock {
    pub fn new(id: BlockId, max_rows: u64) -> Self {
        Self {
            id,
            max_rows,
            frozen: false,
            row_count: 0,
            appends: Vec::new(),
            deletes: Vec::new(),
            pk_index: PkIndex::new(),
            rows: Vec::new(),
            appender_refs: 0,
        }
    }

    pub fn remaining_capacity(&self) -> u64 {
        self.max_rows.saturating_sub(self.row_count)
    }
}

/// An immutable, persisted (compacted) block with a row-level delta
/// delete stream (`§3`). `rows` carries every row ever committed into the
/// source block (so older snapshots can still see it); `deltas` is the
/// resolved delete timeline those older snapshots filter against.
pub struct NonAppendableBlock {
    pub id: BlockId,
    pub rows: Vec<Row>,
    pub deltas: Vec<DeltaDelete>,
    pub compacted_at: Timestamp,
    /// Delete nodes that were still uncommitted at the moment of the
    /// compaction snapshot ("changes in range", `§4.2`). Resolved through
    /// the normal Commit/Rollback path and folded into `deltas` once they
    /// land.
    pub pending_deletes: Vec<DeleteNode>,
}

/// Tagged variant matching the teacher's capability split: `Append` is
/// only legal on `Appendable` (`§9` design notes).
pub enum Block {
    Appendable(AppendableBlock),
    NonAppendable(NonAppendableBlock),
}

impl Block {
    pub fn id(&self) -> BlockId {
        match self {
            Block::Appendable(b) => b.id,
            Block::NonAppendable(b) => b.id,
        }
    }
}
