use htap_common::{ReplicaId, ShardId};
use serde::{Deserialize, Serialize};

/// Configuration accepted by [`crate::LogServiceClient::open`] (`§4.3`).
///
/// Deserializable from the node's TOML configuration file, following the
/// layered-config convention used elsewhere in the workspace: every field
/// has a sensible default so a shard node can start with a near-empty
/// `[log_client]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogClientConfig {
    /// Initial list of cluster endpoints to try, in `host:port` form.
    /// If empty, `discovery_address` is used instead.
    pub service_addresses: Vec<String>,

    /// Endpoint that maps `log_shard_id` to its current replica set.
    /// Consulted only when `service_addresses` is empty.
    pub discovery_address: Option<String>,

    /// The log shard this client is bound to.
    pub log_shard_id: ShardId,

    /// This client's replica identity, stamped into every record it appends.
    pub replica_id: ReplicaId,

    /// If set, the client never issues `Append`/`Truncate`; attempting to
    /// do so is an [`crate::LogClientError::ReadOnly`] error without a
    /// network round-trip.
    pub read_only: bool,

    /// Ceiling, in bytes, for request and response payloads.
    pub max_message_size: usize,

    /// Identifier stamped into log lines and metrics for this client.
    pub tag: String,
}

impl Default for LogClientConfig {
    fn default() -> Self {
        Self {
            service_addresses: Vec::new(),
            discovery_address: None,
            log_shard_id: ShardId(0),
            replica_id: ReplicaId(0),
            read_only: false,
            max_message_size: 8 * 1024 * 1024,
            tag: "logclient".to_string(),
        }
    }
}
