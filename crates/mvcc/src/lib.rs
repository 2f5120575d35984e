//! Per-shard MVCC storage core (`C2`): append/delete version chains over
//! in-memory blocks, a mutable primary-key index, snapshot-consistent
//! reads, write-write conflict detection at Prepare, and compaction of
//! frozen blocks into immutable, delta-delete-backed storage.

mod block;
mod compaction;
mod decision;
mod error;
mod graph;
mod store;

pub use block::{AppendableBlock, Block, DeltaDelete, NonAppendableBlock, PkValue, Row};
pub use decision::NodeState;
pub use error::MvccError;
pub use graph::DirectedGraph;
pub use store::MvccStore;

#[cfg(test)]
mod tests {
    use super::*;
    use htap_common::{BlockId, LocalClock, ShardId, Timestamp, TxnId};
    use std::sync::Arc;

    fn store() -> MvccStore {
        MvccStore::new(ShardId(1), Arc::new(LocalClock::new()))
    }

    fn txn(n: u8) -> TxnId {
        TxnId::new(vec![n])
    }

    #[test]
    fn append_commit_read_round_trip() {
        let s = store();
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        let start_ts = Timestamp(1);
        let rows = s.append(t1.clone(), start_ts, block, vec![(b"pk1".to_vec(), b"v1".to_vec())]).unwrap();
        assert_eq!(rows, vec![0]);

        // Uncommitted: not yet visible.
        assert_eq!(s.read_row(Timestamp(2), block, 0).unwrap(), None);

        let commit_ts = Timestamp(2);
        s.commit(&t1, commit_ts);
        assert_eq!(s.read_row(Timestamp(2), block, 0).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(s.read_row(Timestamp(1), block, 0).unwrap(), None);
    }

    #[test]
    fn ada_append_delete_append_succeeds() {
        let s = store();
        let block = s.new_appendable_block(1024);

        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk3".to_vec(), b"10".to_vec())]).unwrap();
        s.commit(&t1, Timestamp(2));

        let t2 = txn(2);
        s.range_delete(t2.clone(), Timestamp(3), block, [0]).unwrap();
        s.commit(&t2, Timestamp(4));

        let t3 = txn(3);
        let rows = s.append(t3.clone(), Timestamp(5), block, vec![(b"pk3".to_vec(), b"20".to_vec())]).unwrap();
        s.commit(&t3, Timestamp(6));

        assert_eq!(rows, vec![1]);
        assert_eq!(s.read_row(Timestamp(6), block, 0).unwrap(), None);
        assert_eq!(s.read_row(Timestamp(6), block, 1).unwrap(), Some(b"20".to_vec()));
    }

    #[test]
    fn concurrent_append_without_delete_is_duplicate() {
        let s = store();
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec())]).unwrap();
        s.commit(&t1, Timestamp(2));

        let t2 = txn(2);
        let err = s
            .append(t2, Timestamp(3), block, vec![(b"pk1".to_vec(), b"b".to_vec())])
            .unwrap_err();
        assert!(matches!(err, MvccError::Duplicate));
    }

    #[test]
    fn concurrent_uncommitted_append_is_ww_conflict() {
        let s = store();
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec())]).unwrap();
        // t1 not yet committed.

        let t2 = txn(2);
        let err = s
            .append(t2, Timestamp(1), block, vec![(b"pk1".to_vec(), b"b".to_vec())])
            .unwrap_err();
        assert!(matches!(err, MvccError::WwConflict(_)));
    }

    #[test]
    fn rollback_frees_the_key_for_reuse() {
        let s = store();
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec())]).unwrap();
        s.rollback(&t1);

        let t2 = txn(2);
        let rows = s.append(t2.clone(), Timestamp(2), block, vec![(b"pk1".to_vec(), b"b".to_vec())]).unwrap();
        s.commit(&t2, Timestamp(3));
        assert_eq!(s.read_row(Timestamp(3), block, rows[0]).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn block_full_rejects_oversized_batch() {
        let s = store();
        let block = s.new_appendable_block(1);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec())]).unwrap();
        let err = s
            .append(txn(2), Timestamp(2), block, vec![(b"pk2".to_vec(), b"b".to_vec())])
            .unwrap_err();
        assert!(matches!(err, MvccError::BlockFull(_)));
    }

    #[tokio::test]
    async fn get_by_filter_waits_for_concurrent_commit() {
        let s = Arc::new(store());
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec())]).unwrap();

        let reader_store = s.clone();
        let reader = tokio::spawn(async move {
            reader_store.get_by_filter(Timestamp(5), block, b"pk1").await.unwrap()
        });

        tokio::task::yield_now().await;
        s.commit(&t1, Timestamp(2));

        let result = reader.await.unwrap();
        assert_eq!(result, Some((0, b"a".to_vec())));
    }

    #[test]
    fn compaction_materializes_visible_rows_and_deltas() {
        let s = store();
        let block = s.new_appendable_block(1024);
        let t1 = txn(1);
        s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"a".to_vec()), (b"pk2".to_vec(), b"b".to_vec())])
            .unwrap();
        s.commit(&t1, Timestamp(2));

        let t2 = txn(2);
        s.range_delete(t2.clone(), Timestamp(3), block, [0]).unwrap();
        s.commit(&t2, Timestamp(4));

        let new_id = s.compact(block, Timestamp(10)).unwrap();
        assert_eq!(new_id, block);

        // Old snapshot before the delete still sees row 0.
        assert_eq!(s.read_row(Timestamp(2), block, 0).unwrap(), Some(b"a".to_vec()));
        // After the delete's commit_ts, row 0 is gone; row 1 remains.
        assert_eq!(s.read_row(Timestamp(4), block, 0).unwrap(), None);
        assert_eq!(s.read_row(Timestamp(4), block, 1).unwrap(), Some(b"b".to_vec()));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        // `§8` invariant: for any key k in an Appendable block's PK index,
        // at any snapshot ts, at most one row position bound to k is
        // visible. Drives a sequence of committed append/delete/append
        // cycles (the ADA pattern) on one key and checks the invariant
        // holds after every step.
        proptest! {
            #[test]
            fn at_most_one_visible_row_per_key(n_cycles in 1usize..6) {
                let s = store();
                let block = s.new_appendable_block(4096);
                let pk = b"k".to_vec();
                let mut ts = 1u64;
                let mut last_row = None;

                for cycle in 0..n_cycles {
                    let t = txn((cycle % 200) as u8);
                    let start_ts = Timestamp(ts);
                    ts += 1;
                    let rows = s
                        .append(t.clone(), start_ts, block, vec![(pk.clone(), vec![cycle as u8])])
                        .unwrap();
                    let commit_ts = Timestamp(ts);
                    ts += 1;
                    s.commit(&t, commit_ts);

                    let visible_count = (0..=rows[0])
                        .filter(|&pos| s.read_row(commit_ts, block, pos).unwrap().is_some())
                        .count();
                    prop_assert_eq!(visible_count, 1);
                    last_row = Some(rows[0]);

                    if cycle + 1 < n_cycles {
                        let d = txn(((cycle + 100) % 200) as u8);
                        let del_start = Timestamp(ts);
                        ts += 1;
                        s.range_delete(d.clone(), del_start, block, [rows[0]]).unwrap();
                        let del_commit = Timestamp(ts);
                        ts += 1;
                        s.commit(&d, del_commit);
                        prop_assert_eq!(s.read_row(del_commit, block, rows[0]).unwrap(), None);
                    }
                }
                let _ = last_row;
            }
        }
    }
}
