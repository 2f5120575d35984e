use htap_common::{ReplicaId, ShardId};
use htap_coordinator::ShardConfig;
use htap_logclient::LogClientConfig;
use serde::{Deserialize, Serialize};

/// One shard colocated in this process: its storage/coordinator tuning
/// plus the log client it durability-fences through. Peer shards named
/// in `peers` are wired up with [`htap_coordinator::LoopbackPeer`] at
/// startup, since cross-process RPC is out of scope (`§1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardNodeConfig {
    pub shard_id: ShardId,
    #[serde(default)]
    pub coordinator: ShardConfig,
    pub log_client: LogClientConfig,
    #[serde(default)]
    pub peers: Vec<ShardId>,
    #[serde(default = "default_block_capacity")]
    pub block_capacity: u64,
}

fn default_block_capacity() -> u64 {
    1 << 20
}

/// Top-level node configuration, deserialized from the TOML file passed
/// on the command line.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    pub shards: Vec<ShardNodeConfig>,
}

impl Default for ShardNodeConfig {
    fn default() -> Self {
        Self {
            shard_id: ShardId(0),
            coordinator: ShardConfig::default(),
            log_client: LogClientConfig {
                replica_id: ReplicaId(0),
                ..Default::default()
            },
            peers: Vec::new(),
            block_capacity: default_block_capacity(),
        }
    }
}
