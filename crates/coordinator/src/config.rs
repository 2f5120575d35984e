use serde::{Deserialize, Serialize};

/// Coordinator-shard configuration (`§10` ambient stack), layered the
/// same way as [`htap_logclient::LogClientConfig`]: `serde`-deserialized
/// from TOML with a `Default` impl for development use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Max rows per newly-created Appendable block.
    pub block_capacity: u64,
    /// Backoff floor for the async commit task's durability-fence retry
    /// loop (`§4.1` step 6).
    pub commit_retry_backoff_ms: u64,
    /// Backoff ceiling for the same retry loop.
    pub commit_retry_backoff_max_ms: u64,
    pub tag: String,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            block_capacity: 1 << 20,
            commit_retry_backoff_ms: 20,
            commit_retry_backoff_max_ms: 5_000,
            tag: "shard".to_string(),
        }
    }
}
