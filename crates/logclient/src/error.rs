use thiserror::Error;

/// Errors surfaced by [`crate::LogServiceClient`].
///
/// `§4.3`/`§7`: shard-not-found is the one variant the client itself
/// retries (reset-and-reopen); everything else is surfaced to the caller
/// after at most one reset.
#[derive(Error, Debug)]
pub enum LogClientError {
    #[error("no cluster endpoint accepted the connect handshake")]
    NoEndpointAvailable,

    #[error("discovery lookup for shard {0:?} failed: {1}")]
    DiscoveryFailed(htap_common::ShardId, String),

    #[error("shard {0:?} not found on this node")]
    ShardNotFound(htap_common::ShardId),

    #[error("client is not connected; call open() first")]
    NotConnected,

    #[error("client was opened read_only; append/truncate are unavailable")]
    ReadOnly,

    #[error("requested lsn {0:?} has already been truncated")]
    Truncated(htap_common::Lsn),

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed wire message: {0}")]
    Codec(String),

    #[error("server rejected the request: {0}")]
    Server(String),

    #[error("request timed out")]
    Timeout,
}

impl LogClientError {
    /// Whether the client should reset its connection and retry from
    /// `Open` (`§4.3` retry and failover contract). Timeouts and other
    /// errors are surfaced instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogClientError::ShardNotFound(_))
    }
}
