//! Boots one or more colocated shards (`C1` + `C2` + `C3`) from a TOML
//! node configuration file and keeps the process alive until it is
//! signaled to shut down. Cross-process RPC for the coordinator is out
//! of scope (`§1`); colocated shards talk to each other in-process via
//! [`htap_coordinator::LoopbackPeer`].

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use htap_common::{Clock, LocalClock, ShardId};
use htap_coordinator::{CoordinatorShard, LoopbackPeer};
use htap_logclient::LogServiceClient;
use htap_mvcc::MvccStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::NodeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path = std::env::args().nth(1).unwrap_or_else(|| "node.toml".to_string());
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading node config at {path}"))?;
    let config: NodeConfig = toml::from_str(&raw).with_context(|| format!("parsing node config at {path}"))?;
    if config.shards.is_empty() {
        anyhow::bail!("node config at {path} declares no shards");
    }

    let mut shards = HashMap::new();
    for shard in &config.shards {
        let log = LogServiceClient::open(shard.log_client.clone(), None)
            .await
            .with_context(|| format!("connecting shard {} to its log service", shard.shard_id.0))?;
        let clock: Arc<dyn Clock> = Arc::new(LocalClock::new());
        let store = Arc::new(MvccStore::new(shard.shard_id, clock.clone()));
        let coordinator = Arc::new(CoordinatorShard::new(
            shard.shard_id,
            shard.coordinator.clone(),
            store,
            log,
            clock,
        ));
        shards.insert(shard.shard_id, (coordinator, shard.peers.clone()));
        info!(shard = shard.shard_id.0, "shard online");
    }

    let handles: HashMap<ShardId, Arc<CoordinatorShard>> =
        shards.iter().map(|(id, (c, _))| (*id, c.clone())).collect();
    for (id, (coordinator, peers)) in &shards {
        for peer_id in peers {
            let peer = handles
                .get(peer_id)
                .with_context(|| format!("shard {} lists unknown peer {}", id.0, peer_id.0))?;
            coordinator.set_peer(Arc::new(LoopbackPeer::new(peer.clone())));
        }
    }

    info!(shard_count = handles.len(), "node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    // Signal every shard's in-flight retry loops and fan-out tasks to
    // stop starting new attempts; current attempts still run to
    // completion (`§5`).
    for coordinator in handles.values() {
        coordinator.shutdown();
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
