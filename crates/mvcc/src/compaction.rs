use htap_common::{BlockId, Timestamp};
use tracing::instrument;

use crate::block::{Block, DeltaDelete, NonAppendableBlock, Row};
use crate::decision::NodeState;
use crate::error::MvccError;
use crate::store::MvccStore;

impl MvccStore {
    /// Freezes `block_id` against further appends; idempotent. A frozen
    /// block still accepts `range_delete` (`§3` block lifecycle).
    pub fn freeze(&self, block_id: BlockId) -> Result<(), MvccError> {
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        match &mut *guard {
            Block::Appendable(block) => {
                block.frozen = true;
                Ok(())
            }
            Block::NonAppendable(_) => Ok(()),
        }
    }

    /// Compacts a frozen, unreferenced Appendable block into a new
    /// NonAppendable block materialized at `snapshot_ts`, swapping it in
    /// under the same `block_id` (`§4.2` Compaction).
    #[instrument(skip(self), fields(block = ?block_id))]
    pub fn compact(&self, block_id: BlockId, snapshot_ts: Timestamp) -> Result<BlockId, MvccError> {
        self.freeze(block_id)?;
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        let Block::Appendable(block) = &mut *guard else {
            return Err(MvccError::NotAppendable);
        };
        if block.appender_refs > 0 {
            return Err(MvccError::BlockReferenced(block_id));
        }
        if block.appends.iter().any(|n| matches!(n.decision.peek(), NodeState::Uncommitted)) {
            return Err(MvccError::BlockReferenced(block_id));
        }

        let mut rows = Vec::new();
        for node in block.appends.iter() {
            if node.is_aborted() {
                continue;
            }
            for pos in node.start_row..node.max_row {
                if let Some(row) = block.rows.iter().find(|r| r.pos == pos) {
                    rows.push(Row { pos: row.pos, pk: row.pk.clone(), value: row.value.clone() });
                }
            }
        }

        let mut deltas = Vec::new();
        let mut pending_deletes = Vec::new();
        for node in std::mem::take(&mut block.deletes) {
            match node.decision.peek() {
                NodeState::Committed(commit_ts) => {
                    for row in &node.rows {
                        deltas.push(DeltaDelete { row: *row, commit_ts });
                    }
                }
                NodeState::Aborted => {}
                NodeState::Uncommitted => pending_deletes.push(node),
            }
        }

        let compacted = NonAppendableBlock {
            id: block_id,
            rows,
            deltas,
            compacted_at: snapshot_ts,
            pending_deletes,
        };
        drop(guard);
        *arc.write() = Block::NonAppendable(compacted);
        Ok(block_id)
    }
}
