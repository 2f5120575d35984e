use std::sync::Arc;

use htap_common::{Clock, LocalClock, ShardId, Timestamp, TxnId};
use htap_coordinator::{CoordinatorShard, LoopbackPeer, ShardConfig, StorageOp, StorageResult, TxnHeader};
use htap_logclient::mock::MockLogService;
use htap_logclient::{LogClientConfig, LogServiceClient};
use htap_mvcc::MvccStore;

struct TestShard {
    coordinator: Arc<CoordinatorShard>,
    clock: Arc<LocalClock>,
}

impl TestShard {
    fn header(&self, id: &str) -> TxnHeader {
        TxnHeader { id: TxnId::new(id.as_bytes().to_vec()), start_ts: self.clock.now() }
    }

    fn header_for(&self, id: &TxnId) -> TxnHeader {
        TxnHeader { id: id.clone(), start_ts: self.clock.now() }
    }
}

async fn spawn_shard(shard_id: ShardId, log_addr: &str) -> TestShard {
    let config = LogClientConfig {
        service_addresses: vec![log_addr.to_string()],
        log_shard_id: ShardId(0),
        tag: format!("shard-{}", shard_id.0),
        ..Default::default()
    };
    let log = LogServiceClient::open(config, None).await.expect("log client connects");
    let clock = Arc::new(LocalClock::new());
    let store = Arc::new(MvccStore::new(shard_id, clock.clone() as Arc<dyn Clock>));
    let coordinator = Arc::new(CoordinatorShard::new(
        shard_id,
        ShardConfig::default(),
        store,
        log,
        clock.clone() as Arc<dyn Clock>,
    ));
    TestShard { coordinator, clock }
}

fn wire(a: &TestShard, b: &TestShard) {
    a.coordinator.set_peer(Arc::new(LoopbackPeer::new(b.coordinator.clone())));
    b.coordinator.set_peer(Arc::new(LoopbackPeer::new(a.coordinator.clone())));
}

/// `§8` scenario 3: a peer the txn touched cannot be reached at Commit
/// time, so the whole 2PC txn aborts and the write never becomes visible
/// on the shard that did prepare successfully.
#[tokio::test]
async fn two_phase_commit_aborts_when_a_peer_is_unreachable() {
    let log = MockLogService::spawn(ShardId(0)).await;
    let shard_a = spawn_shard(ShardId(1), &log.addr).await;
    let shard_b = spawn_shard(ShardId(2), &log.addr).await;
    // Deliberately not wired: shard_a has no route to shard_b, so its
    // Prepare fan-out will fail with ShardNotFound.

    let block_a = shard_a.coordinator.store().new_appendable_block(128);
    let block_b = shard_b.coordinator.store().new_appendable_block(128);

    let txn = TxnId::new(b"txn-abort".to_vec());
    let header_a = TxnHeader { id: txn.clone(), start_ts: shard_a.clock.now() };
    let header_b = TxnHeader { id: txn.clone(), start_ts: shard_b.clock.now() };

    shard_a
        .coordinator
        .write(header_a, StorageOp::Append { block: block_a, rows: vec![(b"k1".to_vec(), b"v1".to_vec())] })
        .await
        .expect("append on shard a");
    shard_b
        .coordinator
        .write(header_b, StorageOp::Append { block: block_b, rows: vec![(b"k2".to_vec(), b"v2".to_vec())] })
        .await
        .expect("append on shard b");

    let result = shard_a.coordinator.commit(txn.clone(), vec![ShardId(1), ShardId(2)]).await;
    assert!(result.is_err(), "commit should fail when a participant is unreachable");

    let read_header = shard_a.header("reader");
    let seen = shard_a
        .coordinator
        .read(read_header, StorageOp::GetByFilter { block: block_a, pk: b"k1".to_vec() })
        .await
        .expect("read after abort");
    assert_eq!(seen, StorageResult::Row(None));
}

/// `§8` scenario 4: once Prepare succeeds on every shard, Commit returns
/// to the caller as soon as the local shard reaches `Committing`, and the
/// write becomes durably visible on every participant once the
/// background fan-out finishes.
#[tokio::test]
async fn two_phase_commit_succeeds_across_shards() {
    let log = MockLogService::spawn(ShardId(0)).await;
    let shard_a = spawn_shard(ShardId(1), &log.addr).await;
    let shard_b = spawn_shard(ShardId(2), &log.addr).await;
    wire(&shard_a, &shard_b);

    let block_a = shard_a.coordinator.store().new_appendable_block(128);
    let block_b = shard_b.coordinator.store().new_appendable_block(128);

    let txn = TxnId::new(b"txn-commit".to_vec());
    let header_a = TxnHeader { id: txn.clone(), start_ts: shard_a.clock.now() };
    let header_b = TxnHeader { id: txn.clone(), start_ts: shard_b.clock.now() };

    shard_a
        .coordinator
        .write(header_a, StorageOp::Append { block: block_a, rows: vec![(b"k1".to_vec(), b"v1".to_vec())] })
        .await
        .expect("append on shard a");
    shard_b
        .coordinator
        .write(header_b, StorageOp::Append { block: block_b, rows: vec![(b"k2".to_vec(), b"v2".to_vec())] })
        .await
        .expect("append on shard b");

    shard_a
        .coordinator
        .commit(txn.clone(), vec![ShardId(1), ShardId(2)])
        .await
        .expect("commit succeeds");

    // Give the background commit-fanout task a chance to finish.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let far_future = Timestamp(u64::MAX);
    let read_header_a = TxnHeader { id: TxnId::new(b"reader-a".to_vec()), start_ts: far_future };
    let read_header_b = TxnHeader { id: TxnId::new(b"reader-b".to_vec()), start_ts: far_future };

    let seen_a = shard_a
        .coordinator
        .read(read_header_a, StorageOp::GetByFilter { block: block_a, pk: b"k1".to_vec() })
        .await
        .expect("read shard a");
    let seen_b = shard_b
        .coordinator
        .read(read_header_b, StorageOp::GetByFilter { block: block_b, pk: b"k2".to_vec() })
        .await
        .expect("read shard b");

    assert_eq!(seen_a, StorageResult::Row(Some((0, b"v1".to_vec()))));
    assert_eq!(seen_b, StorageResult::Row(Some((0, b"v2".to_vec()))));
}

/// Round-trip law: Rollback after a successful single-shard Write leaves
/// the key free, and a repeated `RollbackShard` call is a no-op.
#[tokio::test]
async fn rollback_is_idempotent_and_frees_the_key() {
    let log = MockLogService::spawn(ShardId(0)).await;
    let shard_a = spawn_shard(ShardId(1), &log.addr).await;

    let block = shard_a.coordinator.store().new_appendable_block(128);
    let txn = TxnId::new(b"txn-rollback".to_vec());
    let header = shard_a.header_for(&txn);

    shard_a
        .coordinator
        .write(header, StorageOp::Append { block, rows: vec![(b"k1".to_vec(), b"v1".to_vec())] })
        .await
        .expect("append");

    shard_a.coordinator.rollback(txn.clone(), vec![ShardId(1)]).await.expect("rollback");
    shard_a.coordinator.rollback_shard_internal(&txn).await.expect("idempotent rollback-shard");

    let retry_header = shard_a.header("txn-retry");
    let positions = shard_a
        .coordinator
        .write(retry_header, StorageOp::Append { block, rows: vec![(b"k1".to_vec(), b"v1-again".to_vec())] })
        .await
        .expect("append after rollback reuses the key");
    assert_eq!(positions, StorageResult::Rows(vec![1]));
}
