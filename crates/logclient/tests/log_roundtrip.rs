use htap_common::{Lsn, ReplicaId, ShardId};
use htap_logclient::mock::MockLogService;
use htap_logclient::{LogClientConfig, LogServiceClient};

fn config_for(addr: &str, shard: ShardId) -> LogClientConfig {
    LogClientConfig {
        service_addresses: vec![addr.to_string()],
        discovery_address: None,
        log_shard_id: shard,
        replica_id: ReplicaId(1),
        read_only: false,
        max_message_size: 1 << 20,
        tag: "test".to_string(),
    }
}

/// Scenario 6: append R1..R5, truncate through L3, and confirm reads
/// respect the truncation boundary and resume correctly afterwards.
#[tokio::test]
async fn log_round_trip() {
    let shard = ShardId(1);
    let server = MockLogService::spawn(shard).await;
    let mut client = LogServiceClient::open(config_for(&server.addr, shard), None)
        .await
        .expect("open");

    let mut lsns = Vec::new();
    for i in 0..5 {
        let lsn = client.append(format!("R{i}").as_bytes()).await.expect("append");
        lsns.push(lsn);
    }
    for w in lsns.windows(2) {
        assert!(w[1].0 > w[0].0, "lsns must be strictly increasing");
    }

    client.truncate(lsns[2]).await.expect("truncate");

    let err = client.read(lsns[0], 1 << 16).await;
    assert!(err.is_err(), "reading a truncated lsn must fail");

    let (records, next_lsn) = client.read(lsns[3], 1 << 16).await.expect("read after truncation");
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0].payload[..], b"R3");
    assert_eq!(&records[1].payload[..], b"R4");
    assert_eq!(next_lsn, Lsn(lsns[4].0 + 1));

    server.shutdown();
}

/// A transient shard-not-found on the handshake is retried transparently
/// by `open`'s internal candidate loop once the server recovers.
#[tokio::test]
async fn client_resets_and_retries_on_shard_not_found() {
    let shard = ShardId(7);
    let server = MockLogService::spawn(shard).await;
    server.fail_next_connects(2);

    // `open` only tries each candidate endpoint once per call, so the
    // first open() attempt is expected to fail while the server is still
    // returning shard-not-found; a fresh open() after recovery succeeds.
    let first = LogServiceClient::open(config_for(&server.addr, shard), None).await;
    assert!(first.is_err());

    let second = LogServiceClient::open(config_for(&server.addr, shard), None)
        .await
        .expect("second attempt connects once the shard is loaded");
    drop(second);

    server.shutdown();
}

#[tokio::test]
async fn get_tso_timestamp_reserves_a_contiguous_range() {
    let shard = ShardId(2);
    let server = MockLogService::spawn(shard).await;
    let mut client = LogServiceClient::open(config_for(&server.addr, shard), None)
        .await
        .expect("open");

    let first = client.get_tso_timestamp(10).await.expect("tso");
    let second = client.get_tso_timestamp(5).await.expect("tso");
    assert_eq!(second.0, first.0 + 10);

    server.shutdown();
}

#[tokio::test]
async fn read_only_client_rejects_append_and_truncate() {
    let shard = ShardId(3);
    let server = MockLogService::spawn(shard).await;
    let mut cfg = config_for(&server.addr, shard);
    cfg.read_only = true;
    let mut client = LogServiceClient::open(cfg, None).await.expect("open");

    assert!(client.append(b"nope").await.is_err());
    assert!(client.truncate(Lsn(1)).await.is_err());

    server.shutdown();
}
