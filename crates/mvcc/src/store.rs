use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use htap_common::{BlockId, Clock, ShardId, Timestamp, TxnId};
use parking_lot::{Mutex, RwLock};
use tracing::instrument;

use crate::block::{AppendNode, AppendableBlock, Block, DeleteNode, PkValue, Row};
use crate::decision::{Decision, NodeState};
use crate::error::MvccError;

/// Per-shard MVCC storage core (`§4.2`). Owns a set of blocks and, per
/// active transaction, the set of blocks it has written to so Prepare,
/// Commit, and Rollback can find their nodes without a secondary index.
pub struct MvccStore {
    shard: ShardId,
    blocks: RwLock<HashMap<BlockId, Arc<RwLock<Block>>>>,
    next_block_id: AtomicU64,
    txn_writes: Mutex<HashMap<TxnId, Vec<BlockId>>>,
    clock: Arc<dyn Clock>,
}

async fn resolve(decision: &Decision) -> NodeState {
    let state = decision.peek();
    if matches!(state, NodeState::Uncommitted) {
        decision.wait().await
    } else {
        state
    }
}

impl MvccStore {
    pub fn new(shard: ShardId, clock: Arc<dyn Clock>) -> Self {
        Self {
            shard,
            blocks: RwLock::new(HashMap::new()),
            next_block_id: AtomicU64::new(1),
            txn_writes: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard
    }

    pub fn new_appendable_block(&self, max_rows: u64) -> BlockId {
        let id = BlockId(self.next_block_id.fetch_add(1, Ordering::SeqCst));
        let block = Block::Appendable(AppendableBlock::new(id, max_rows));
        self.blocks.write().insert(id, Arc::new(RwLock::new(block)));
        id
    }

    pub(crate) fn block_arc(&self, id: BlockId) -> Result<Arc<RwLock<Block>>, MvccError> {
        self.blocks
            .read()
            .get(&id)
            .cloned()
            .ok_or(MvccError::BlockNotFound(id))
    }

    /// Registers a live appender handle against `block_id`, preventing
    /// compaction until a matching [`release_appender`](Self::release_appender)
    /// (`§5` shared-resource policy).
    pub fn acquire_appender(&self, block_id: BlockId) -> Result<(), MvccError> {
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        match &mut *guard {
            Block::Appendable(block) => {
                block.appender_refs += 1;
                Ok(())
            }
            Block::NonAppendable(_) => Err(MvccError::NotAppendable),
        }
    }

    pub fn release_appender(&self, block_id: BlockId) -> Result<(), MvccError> {
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        if let Block::Appendable(block) = &mut *guard {
            block.appender_refs = block.appender_refs.saturating_sub(1);
        }
        Ok(())
    }

    fn touch(&self, txn: &TxnId, block: BlockId) {
        let mut writes = self.txn_writes.lock();
        let entry = writes.entry(txn.clone()).or_default();
        if !entry.contains(&block) {
            entry.push(block);
        }
    }

    /// Append rows, deduping against the PK index per the ADA rule
    /// (`§4.2`). Fails the whole batch atomically on the first conflict.
    #[instrument(skip(self, rows), fields(shard = %self.shard, block = ?block_id, txn = %txn))]
    pub fn append(
        &self,
        txn: TxnId,
        start_ts: Timestamp,
        block_id: BlockId,
        rows: Vec<(PkValue, Vec<u8>)>,
    ) -> Result<Vec<u64>, MvccError> {
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        let Block::Appendable(block) = &mut *guard else {
            return Err(MvccError::NotAppendable);
        };
        if block.frozen {
            return Err(MvccError::BlockFrozen(block_id));
        }
        if (rows.len() as u64) > block.remaining_capacity() {
            return Err(MvccError::BlockFull(block_id));
        }

        for (pk, _) in &rows {
            match check_pk(block, pk, start_ts, &txn) {
                DedupOutcome::Absent => {}
                DedupOutcome::Duplicate => return Err(MvccError::Duplicate),
                DedupOutcome::WwConflict => return Err(MvccError::WwConflict(txn)),
            }
        }

        let start_row = block.row_count;
        let mut positions = Vec::with_capacity(rows.len());
        for (pk, value) in rows {
            let pos = block.row_count;
            block.rows.push(Row { pos, pk: pk.clone(), value });
            block.pk_index.record(pk, pos);
            block.row_count += 1;
            positions.push(pos);
        }
        block.appends.push(AppendNode {
            txn: txn.clone(),
            start_row,
            max_row: block.row_count,
            decision: Arc::new(Decision::new()),
        });
        drop(guard);
        self.touch(&txn, block_id);
        Ok(positions)
    }

    /// Stages a range-delete. Only legal against Appendable blocks in
    /// this implementation; compacted blocks take deletes only as
    /// "changes in range" carried over from the compaction that produced
    /// them (`§9` design notes on compaction).
    #[instrument(skip(self, positions), fields(shard = %self.shard, block = ?block_id, txn = %txn))]
    pub fn range_delete(
        &self,
        txn: TxnId,
        start_ts: Timestamp,
        block_id: BlockId,
        positions: impl IntoIterator<Item = u64>,
    ) -> Result<(), MvccError> {
        let arc = self.block_arc(block_id)?;
        let mut guard = arc.write();
        let Block::Appendable(block) = &mut *guard else {
            return Err(MvccError::NotAppendable);
        };
        let rows: BTreeSet<u64> = positions.into_iter().collect();
        if rows.is_empty() || rows.iter().any(|&r| r >= block.row_count) {
            return Err(MvccError::InvalidRange);
        }

        // Already-committed-and-visible deletes over a row are a no-op
        // for that row rather than an error (`§4.2` RangeDelete step 1).
        let already_deleted: BTreeSet<u64> = rows
            .iter()
            .copied()
            .filter(|&row| {
                block
                    .deletes
                    .iter()
                    .any(|d| d.rows.contains(&row) && d.is_visible_at(start_ts))
            })
            .collect();
        let to_delete: BTreeSet<u64> = rows.difference(&already_deleted).copied().collect();
        if to_delete.is_empty() {
            return Ok(());
        }

        block.deletes.push(DeleteNode {
            txn: txn.clone(),
            rows: to_delete,
            decision: Arc::new(Decision::new()),
        });
        drop(guard);
        self.touch(&txn, block_id);
        Ok(())
    }

    /// Column/value read at a row position (`GetColumnData`, `§4.2`).
    /// Does not wait on in-flight decisions; an uncommitted append above
    /// the visible frontier is simply invisible.
    pub fn read_row(&self, start_ts: Timestamp, block_id: BlockId, pos: u64) -> Result<Option<Vec<u8>>, MvccError> {
        let arc = self.block_arc(block_id)?;
        let guard = arc.read();
        match &*guard {
            Block::Appendable(block) => {
                let Some(append) = block.appends.iter().find(|n| n.contains_row(pos)) else {
                    return Ok(None);
                };
                if !append.is_visible_at(start_ts) {
                    return Ok(None);
                }
                let deleted = block
                    .deletes
                    .iter()
                    .any(|d| d.rows.contains(&pos) && d.is_visible_at(start_ts));
                if deleted {
                    return Ok(None);
                }
                Ok(block.rows.iter().find(|r| r.pos == pos).map(|r| r.value.clone()))
            }
            Block::NonAppendable(block) => {
                let Some(row) = block.rows.iter().find(|r| r.pos == pos) else {
                    return Ok(None);
                };
                let deleted = block
                    .deltas
                    .iter()
                    .any(|d| d.row == pos && d.commit_ts <= start_ts);
                if deleted {
                    Ok(None)
                } else {
                    Ok(Some(row.value.clone()))
                }
            }
        }
    }

    /// Point lookup by primary key (`GetByFilter`, `§4.2`). Waits for any
    /// governing append/delete node still committing at or below
    /// `start_ts`, newest candidate first.
    pub async fn get_by_filter(
        &self,
        start_ts: Timestamp,
        block_id: BlockId,
        pk: &[u8],
    ) -> Result<Option<(u64, Vec<u8>)>, MvccError> {
        let arc = self.block_arc(block_id)?;

        struct Candidate {
            row: u64,
            append: Arc<Decision>,
            delete: Option<Arc<Decision>>,
            value: Vec<u8>,
        }

        let (is_appendable, candidates) = {
            let guard = arc.read();
            match &*guard {
                Block::Appendable(block) => {
                    let mut v = Vec::new();
                    for &row in block.pk_index.candidates(pk).iter().rev() {
                        let Some(append) = block.appends.iter().find(|n| n.contains_row(row)) else {
                            continue;
                        };
                        let delete = block
                            .deletes
                            .iter()
                            .find(|d| d.rows.contains(&row))
                            .map(|d| d.decision.clone());
                        let value = block
                            .rows
                            .iter()
                            .find(|r| r.pos == row)
                            .map(|r| r.value.clone())
                            .unwrap_or_default();
                        v.push(Candidate { row, append: append.decision.clone(), delete, value });
                    }
                    (true, v)
                }
                Block::NonAppendable(block) => {
                    let mut v = Vec::new();
                    for row in block.rows.iter().filter(|r| r.pk == pk) {
                        let deleted = block
                            .deltas
                            .iter()
                            .filter(|d| d.row == row.pos)
                            .map(|d| d.commit_ts)
                            .max();
                        if let Some(ts) = deleted {
                            if ts <= start_ts {
                                continue;
                            }
                        }
                        return Ok(Some((row.pos, row.value.clone())));
                    }
                    (false, v)
                }
            }
        };
        if !is_appendable {
            return Ok(None);
        }

        for c in candidates {
            match resolve(&c.append).await {
                NodeState::Aborted => continue,
                NodeState::Committed(ts) if ts <= start_ts => {
                    if let Some(del) = &c.delete {
                        match resolve(del).await {
                            NodeState::Aborted => return Ok(Some((c.row, c.value))),
                            NodeState::Committed(dts) if dts <= start_ts => return Ok(None),
                            _ => return Ok(Some((c.row, c.value))),
                        }
                    } else {
                        return Ok(Some((c.row, c.value)));
                    }
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Validates write-write-conflict freedom against committed versions
    /// and assigns `prepared_ts` from the local clock (`§4.2` Prepare).
    #[instrument(skip(self), fields(shard = %self.shard, txn = %txn))]
    pub fn prepare(&self, txn: &TxnId) -> Result<Timestamp, MvccError> {
        let blocks = {
            let writes = self.txn_writes.lock();
            writes.get(txn).cloned().unwrap_or_default()
        };
        for block_id in &blocks {
            let arc = self.block_arc(*block_id)?;
            let guard = arc.read();
            let Block::Appendable(block) = &*guard else { continue };

            for node in block.appends.iter().filter(|n| &n.txn == txn) {
                for row in node.start_row..node.max_row {
                    let pk = &block.rows.iter().find(|r| r.pos == row).expect("row exists").pk;
                    for &other_row in block.pk_index.candidates(pk) {
                        if other_row == row {
                            continue;
                        }
                        if let Some(other) = block.appends.iter().find(|n| n.contains_row(other_row)) {
                            if &other.txn == txn {
                                continue;
                            }
                            if matches!(other.decision.peek(), NodeState::Committed(_)) {
                                let superseded = block
                                    .deletes
                                    .iter()
                                    .any(|d| d.rows.contains(&other_row) && matches!(d.decision.peek(), NodeState::Committed(_)));
                                if !superseded {
                                    return Err(MvccError::WwConflict(txn.clone()));
                                }
                            }
                        }
                    }
                }
            }

            for node in block.deletes.iter().filter(|n| &n.txn == txn) {
                for other in block.deletes.iter() {
                    if &other.txn == txn || other.is_aborted() {
                        continue;
                    }
                    if other.rows.intersection(&node.rows).next().is_some() {
                        return Err(MvccError::WwConflict(txn.clone()));
                    }
                }
            }
        }
        Ok(self.clock.now())
    }

    /// Stamps every node this txn owns as committed at `commit_ts`
    /// (`§4.2` Commit).
    #[instrument(skip(self), fields(shard = %self.shard, txn = %txn))]
    pub fn commit(&self, txn: &TxnId, commit_ts: Timestamp) {
        self.resolve_txn(txn, NodeState::Committed(commit_ts));
    }

    /// Stamps every node this txn owns as aborted (`§4.2` Rollback).
    #[instrument(skip(self), fields(shard = %self.shard, txn = %txn))]
    pub fn rollback(&self, txn: &TxnId) {
        self.resolve_txn(txn, NodeState::Aborted);
    }

    fn resolve_txn(&self, txn: &TxnId, outcome: NodeState) {
        let blocks = self.txn_writes.lock().remove(txn).unwrap_or_default();
        for block_id in blocks {
            let Ok(arc) = self.block_arc(block_id) else { continue };
            let mut guard = arc.write();
            match &mut *guard {
                Block::Appendable(block) => {
                    for node in block.appends.iter().filter(|n| &n.txn == txn) {
                        node.decision.resolve(outcome);
                    }
                    for node in block.deletes.iter().filter(|n| &n.txn == txn) {
                        node.decision.resolve(outcome);
                    }
                }
                Block::NonAppendable(block) => {
                    for node in block.pending_deletes.iter().filter(|n| &n.txn == txn) {
                        node.decision.resolve(outcome);
                    }
                }
            }
        }
    }
}

enum DedupOutcome {
    Absent,
    Duplicate,
    WwConflict,
}

/// The ADA dedup rule (`§4.2`): walk every row position the PK index has
/// ever bound to `pk` and classify whether a fresh append is legal.
fn check_pk(block: &AppendableBlock, pk: &[u8], start_ts: Timestamp, self_txn: &TxnId) -> DedupOutcome {
    for &row in block.pk_index.candidates(pk) {
        let Some(append) = block.appends.iter().find(|n| n.contains_row(row)) else {
            continue;
        };
        if &append.txn == self_txn {
            continue;
        }
        match append.decision.peek() {
            NodeState::Aborted => continue,
            NodeState::Uncommitted => return DedupOutcome::WwConflict,
            NodeState::Committed(commit_ts) => {
                if commit_ts > start_ts {
                    continue;
                }
                let delete = block.deletes.iter().find(|d| d.rows.contains(&row));
                match delete {
                    None => return DedupOutcome::Duplicate,
                    // Self deleted this row earlier in the same txn (the
                    // update path: RangeDelete + Append on the same PK).
                    // The delete hasn't resolved yet, but it's ours, so the
                    // row reads as absent rather than a conflict.
                    Some(d) if &d.txn == self_txn && matches!(d.decision.peek(), NodeState::Uncommitted) => continue,
                    Some(d) => match d.decision.peek() {
                        NodeState::Aborted => return DedupOutcome::Duplicate,
                        NodeState::Committed(d_ts) if d_ts <= start_ts => continue,
                        _ => return DedupOutcome::WwConflict,
                    },
                }
            }
        }
    }
    DedupOutcome::Absent
}
