use bytes::{Buf, BufMut, Bytes, BytesMut};
use htap_common::{Lsn, ReplicaId, ShardId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::LogClientError;

/// Tag distinguishing caller-supplied log entries from records the log
/// service itself emits (e.g. internal checkpoints). `§3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum RecordType {
    UserEntry = 1,
    Internal = 2,
}

impl RecordType {
    fn from_u32(v: u32) -> Result<Self, LogClientError> {
        match v {
            1 => Ok(RecordType::UserEntry),
            2 => Ok(RecordType::Internal),
            other => Err(LogClientError::Codec(format!("unknown record type tag {other}"))),
        }
    }
}

/// One log entry as seen by the client: the header the service assigns
/// plus the caller's opaque payload. `Read` returns these.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub record_type: RecordType,
    pub replica_id: ReplicaId,
    pub payload: Bytes,
}

/// Header format (`§6`): 4 bytes record type || 8 bytes replica id || N
/// bytes user payload, all header fields big-endian. The client prepends
/// this to every `Append` payload; the service prepends the LSN framing on
/// top, which is internal to the transport and not modeled here.
pub fn encode_record(record_type: RecordType, replica_id: ReplicaId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 8 + payload.len());
    buf.put_u32(record_type as u32);
    buf.put_u64(replica_id.0);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn decode_record(lsn: Lsn, mut raw: Bytes) -> Result<LogRecord, LogClientError> {
    if raw.len() < 12 {
        return Err(LogClientError::Codec(format!(
            "record at {lsn:?} is {} bytes, shorter than the 12-byte header",
            raw.len()
        )));
    }
    let record_type = RecordType::from_u32(raw.get_u32())?;
    let replica_id = ReplicaId(raw.get_u64());
    Ok(LogRecord {
        lsn,
        record_type,
        replica_id,
        payload: raw,
    })
}

/// Wire ops (`§6`). `Connect`/`ConnectReadOnly` are the handshake sent by
/// `Open`; the rest mirror [`crate::LogServiceClient`]'s public methods
/// one-to-one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Connect { shard_id: ShardId, replica_id: ReplicaId },
    ConnectReadOnly { shard_id: ShardId, replica_id: ReplicaId },
    Append { shard_id: ShardId, replica_id: ReplicaId, payload: Vec<u8> },
    Read { shard_id: ShardId, lsn: Lsn, max_size: usize },
    Truncate { shard_id: ShardId, lsn: Lsn },
    GetTruncate { shard_id: ShardId },
    TsoUpdate { count: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub error: Option<String>,
    /// Retryable-at-the-client marker, set by the server when the error
    /// is a transient "I don't have that shard yet" condition.
    pub shard_not_found: bool,
    pub lsn: Option<Lsn>,
    pub last_lsn: Option<Lsn>,
    pub tso_value: Option<Timestamp>,
    pub records: Vec<(Lsn, Vec<u8>)>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            error: None,
            shard_not_found: false,
            lsn: None,
            last_lsn: None,
            tso_value: None,
            records: Vec::new(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn shard_not_found(shard: ShardId) -> Self {
        Self {
            error: Some(format!("shard {shard:?} not loaded on this node")),
            shard_not_found: true,
            ..Self::ok()
        }
    }

    /// Converts a wire error into a typed [`LogClientError`], classifying
    /// shard-not-found as retryable per `§4.3`.
    pub fn into_result(self, shard: ShardId) -> Result<Response, LogClientError> {
        match &self.error {
            None => Ok(self),
            Some(_) if self.shard_not_found => Err(LogClientError::ShardNotFound(shard)),
            Some(msg) => Err(LogClientError::Server(msg.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_header_round_trips() {
        let encoded = encode_record(RecordType::UserEntry, ReplicaId(7), b"hello");
        let decoded = decode_record(Lsn(42), encoded).unwrap();
        assert_eq!(decoded.lsn, Lsn(42));
        assert_eq!(decoded.record_type, RecordType::UserEntry);
        assert_eq!(decoded.replica_id, ReplicaId(7));
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn short_record_is_rejected() {
        let err = decode_record(Lsn(1), Bytes::from_static(b"short"));
        assert!(err.is_err());
    }
}
