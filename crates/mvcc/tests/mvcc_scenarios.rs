use std::sync::Arc;

use htap_common::{LocalClock, ShardId, Timestamp, TxnId};
use htap_mvcc::{MvccError, MvccStore};

fn store() -> MvccStore {
    MvccStore::new(ShardId(1), Arc::new(LocalClock::new()))
}

/// Scenario 2 (`§8`): T1 starts, writes pk=5 (uncommitted). T2 starts,
/// tries to write the same key and must fail with a write-write conflict
/// without blocking; T1 then commits successfully and a later read sees
/// T1's value.
#[test]
fn write_write_conflict_on_concurrent_update() {
    let s = store();
    let block = s.new_appendable_block(1024);

    let t1 = TxnId::new(vec![1]);
    let t1_start = Timestamp(1);
    s.append(t1.clone(), t1_start, block, vec![(b"pk5".to_vec(), b"2222".to_vec())])
        .expect("t1 writes pk=5");

    let t2 = TxnId::new(vec![2]);
    let err = s
        .append(t2, Timestamp(2), block, vec![(b"pk5".to_vec(), b"1111".to_vec())])
        .unwrap_err();
    assert!(matches!(err, MvccError::WwConflict(_)), "t2 must fail without blocking");

    s.commit(&t1, Timestamp(3));
    assert_eq!(s.read_row(Timestamp(3), block, 0).unwrap(), Some(b"2222".to_vec()));
}

/// Scenario 5 (`§8`): T1 opens at start_ts=S; T2 appends and commits at a
/// commit_ts above S. T1's read must not observe T2's rows.
#[tokio::test]
async fn snapshot_read_does_not_see_concurrent_commit() {
    let s = store();
    let block = s.new_appendable_block(1024);

    let t1 = TxnId::new(vec![1]);
    s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"base".to_vec())])
        .unwrap();
    s.commit(&t1, Timestamp(2));

    let snapshot_ts = Timestamp(5);

    let t2 = TxnId::new(vec![2]);
    let rows: Vec<_> = (0..10)
        .map(|i| (format!("pk{i}").into_bytes(), format!("v{i}").into_bytes()))
        .collect();
    s.append(t2.clone(), Timestamp(6), block, rows).unwrap();
    s.commit(&t2, Timestamp(10));

    // The base row, committed before the snapshot, is visible...
    assert_eq!(s.read_row(snapshot_ts, block, 0).unwrap(), Some(b"base".to_vec()));
    // ...but none of T2's ten rows (positions 1..=10) are, since they
    // committed at ts=10 > snapshot_ts=5.
    for pos in 1..=10 {
        assert_eq!(s.read_row(snapshot_ts, block, pos).unwrap(), None);
    }
    // A fresh read at or after T2's commit_ts sees them all.
    assert_eq!(s.read_row(Timestamp(10), block, 1).unwrap(), Some(b"v0".to_vec()));
}

/// Scenario 2 (`§8`), the literal update path: a single txn deletes the
/// existing committed row for a key and appends a new value under that
/// same key (`update = RangeDelete(row) + Append(newValue)`). The
/// self-owned, still-uncommitted delete must not make the follow-up
/// Append see the old row as a conflicting duplicate.
#[test]
fn update_via_delete_then_append_same_pk_succeeds() {
    let s = store();
    let block = s.new_appendable_block(1024);

    let t0 = TxnId::new(vec![0]);
    let rows = s
        .append(t0.clone(), Timestamp(1), block, vec![(b"pk5".to_vec(), b"1111".to_vec())])
        .unwrap();
    s.commit(&t0, Timestamp(2));

    let t1 = TxnId::new(vec![1]);
    let t1_start = Timestamp(3);
    s.range_delete(t1.clone(), t1_start, block, rows.clone()).expect("t1 deletes pk=5");
    let new_rows = s
        .append(t1.clone(), t1_start, block, vec![(b"pk5".to_vec(), b"2222".to_vec())])
        .expect("t1's own update of pk=5 must not conflict with its own delete");
    s.commit(&t1, Timestamp(4));

    assert_eq!(s.read_row(Timestamp(4), block, new_rows[0]).unwrap(), Some(b"2222".to_vec()));
    assert_eq!(s.read_row(Timestamp(4), block, rows[0]).unwrap(), None);
}

/// `§8` round-trip law: Append -> Rollback -> Append on the same key
/// succeeds.
#[test]
fn append_rollback_append_same_key() {
    let s = store();
    let block = s.new_appendable_block(1024);

    let t1 = TxnId::new(vec![1]);
    s.append(t1.clone(), Timestamp(1), block, vec![(b"pk1".to_vec(), b"first".to_vec())])
        .unwrap();
    s.rollback(&t1);

    let t2 = TxnId::new(vec![2]);
    let rows = s
        .append(t2.clone(), Timestamp(2), block, vec![(b"pk1".to_vec(), b"second".to_vec())])
        .unwrap();
    s.commit(&t2, Timestamp(3));
    assert_eq!(s.read_row(Timestamp(3), block, rows[0]).unwrap(), Some(b"second".to_vec()));
}
