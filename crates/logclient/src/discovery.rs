use async_trait::async_trait;
use htap_common::ShardId;

use crate::error::LogClientError;

/// Maps a log shard id to its current replica set, leader first. `Open`
/// consults this only when `service_addresses` is empty (`§4.3`).
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn resolve(&self, shard_id: ShardId) -> Result<Vec<String>, LogClientError>;
}

/// A discovery source backed by a fixed, in-memory shard -> replica-set
/// table. Suitable for tests and for single-process deployments where the
/// topology is known up front; a networked discovery service would
/// implement the same trait over HTTP.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    table: std::collections::HashMap<ShardId, Vec<String>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard(mut self, shard_id: ShardId, replicas: Vec<String>) -> Self {
        self.table.insert(shard_id, replicas);
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn resolve(&self, shard_id: ShardId) -> Result<Vec<String>, LogClientError> {
        self.table
            .get(&shard_id)
            .cloned()
            .ok_or(LogClientError::DiscoveryFailed(shard_id, "no such shard in topology".to_string()))
    }
}
