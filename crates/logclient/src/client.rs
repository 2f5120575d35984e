use std::sync::Arc;

use bytes::Bytes;
use htap_common::{Lsn, ReplicaId, ShardId, Timestamp};
use rand::seq::SliceRandom;
use tracing::{info, instrument, warn};

use crate::config::LogClientConfig;
use crate::discovery::Discovery;
use crate::error::LogClientError;
use crate::transport::Connection;
use crate::wire::{decode_record, encode_record, LogRecord, RecordType, Request, Response};

/// Client for one log shard (`§4.3`). Holds at most one live connection;
/// a non-nil error from the server always resets it, and `ShardNotFound`
/// additionally triggers an automatic reopen-and-retry.
pub struct LogServiceClient {
    config: LogClientConfig,
    discovery: Option<Arc<dyn Discovery>>,
    conn: Option<Connection>,
}

impl LogServiceClient {
    /// Resolves an initial endpoint, connects, and performs the
    /// `Connect`/`ConnectReadOnly` handshake. Fails if no candidate
    /// endpoint accepts the handshake.
    #[instrument(skip(discovery), fields(tag = %config.tag, shard = ?config.log_shard_id))]
    pub async fn open(config: LogClientConfig, discovery: Option<Arc<dyn Discovery>>) -> Result<Self, LogClientError> {
        let mut client = Self { config, discovery, conn: None };
        client.reconnect().await?;
        Ok(client)
    }

    /// Idempotent; closes the underlying transport.
    pub fn close(&mut self) {
        self.conn = None;
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn candidate_endpoints(&self) -> Result<Vec<String>, LogClientError> {
        if !self.config.service_addresses.is_empty() {
            let mut addrs = self.config.service_addresses.clone();
            addrs.shuffle(&mut rand::rng());
            Ok(addrs)
        } else {
            let discovery = self
                .discovery
                .as_ref()
                .ok_or(LogClientError::NoEndpointAvailable)?;
            // Discovery returns the replica set leader-first; we try it in
            // that order (leader first, followers as fallback).
            discovery.resolve(self.config.log_shard_id).await
        }
    }

    async fn reconnect(&mut self) -> Result<(), LogClientError> {
        self.conn = None;
        let endpoints = self.candidate_endpoints().await?;
        let handshake = if self.config.read_only {
            Request::ConnectReadOnly {
                shard_id: self.config.log_shard_id,
                replica_id: self.config.replica_id,
            }
        } else {
            Request::Connect {
                shard_id: self.config.log_shard_id,
                replica_id: self.config.replica_id,
            }
        };

        for addr in &endpoints {
            let mut conn = match Connection::connect(addr, self.config.max_message_size).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(tag = %self.config.tag, endpoint = %addr, error = %e, "connect failed, trying next endpoint");
                    continue;
                }
            };
            match conn
                .roundtrip(&handshake)
                .await
                .and_then(|r| r.into_result(self.config.log_shard_id))
            {
                Ok(_) => {
                    info!(tag = %self.config.tag, endpoint = %addr, "log client connected");
                    self.conn = Some(conn);
                    return Ok(());
                }
                Err(e) => {
                    warn!(tag = %self.config.tag, endpoint = %addr, error = %e, "handshake rejected, trying next endpoint");
                }
            }
        }
        Err(LogClientError::NoEndpointAvailable)
    }

    /// Sends `req`, resetting the connection on any error and retrying
    /// once from `Open` if the error is classified retryable (`§4.3`).
    async fn call(&mut self, req: Request) -> Result<Response, LogClientError> {
        if self.conn.is_none() {
            self.reconnect().await?;
        }
        match self.try_call(&req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(tag = %self.config.tag, error = %e, "request failed, resetting connection");
                self.conn = None;
                if e.is_retryable() {
                    self.reconnect().await?;
                    self.try_call(&req).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn try_call(&mut self, req: &Request) -> Result<Response, LogClientError> {
        let shard = self.config.log_shard_id;
        let conn = self.conn.as_mut().ok_or(LogClientError::NotConnected)?;
        conn.roundtrip(req).await?.into_result(shard)
    }

    /// Appends `payload`, returning the server-assigned LSN. At-most-once
    /// from the client's perspective; higher-level idempotence, if
    /// retried above this client, is the caller's responsibility (`§4.3`).
    #[instrument(skip(self, payload), fields(tag = %self.config.tag))]
    pub async fn append(&mut self, payload: &[u8]) -> Result<Lsn, LogClientError> {
        if self.config.read_only {
            return Err(LogClientError::ReadOnly);
        }
        let framed = encode_record(RecordType::UserEntry, self.config.replica_id, payload);
        let resp = self
            .call(Request::Append {
                shard_id: self.config.log_shard_id,
                replica_id: self.config.replica_id,
                payload: framed.to_vec(),
            })
            .await?;
        resp.lsn.ok_or_else(|| LogClientError::Codec("append response missing lsn".to_string()))
    }

    /// Returns records starting at `first_lsn`, and the LSN to resume
    /// from. `max_size_bytes` caps the response payload, not the count.
    pub async fn read(&mut self, first_lsn: Lsn, max_size_bytes: usize) -> Result<(Vec<LogRecord>, Lsn), LogClientError> {
        let resp = self
            .call(Request::Read {
                shard_id: self.config.log_shard_id,
                lsn: first_lsn,
                max_size: max_size_bytes,
            })
            .await?;
        let mut records = Vec::with_capacity(resp.records.len());
        for (lsn, raw) in resp.records {
            records.push(decode_record(lsn, Bytes::from(raw))?);
        }
        let next_lsn = resp.last_lsn.unwrap_or(first_lsn);
        Ok((records, next_lsn))
    }

    /// Frees LSNs `<= lsn`; subsequent reads starting at or below `lsn`
    /// will fail.
    pub async fn truncate(&mut self, lsn: Lsn) -> Result<(), LogClientError> {
        if self.config.read_only {
            return Err(LogClientError::ReadOnly);
        }
        self.call(Request::Truncate {
            shard_id: self.config.log_shard_id,
            lsn,
        })
        .await?;
        Ok(())
    }

    pub async fn get_truncated_lsn(&mut self) -> Result<Lsn, LogClientError> {
        let resp = self
            .call(Request::GetTruncate {
                shard_id: self.config.log_shard_id,
            })
            .await?;
        Ok(resp.lsn.unwrap_or(Lsn(0)))
    }

    /// Atomically reserves `count` consecutive timestamps, returning the
    /// first.
    pub async fn get_tso_timestamp(&mut self, count: u64) -> Result<Timestamp, LogClientError> {
        let resp = self.call(Request::TsoUpdate { count }).await?;
        resp.tso_value
            .ok_or_else(|| LogClientError::Codec("tso response missing value".to_string()))
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    pub fn shard_id(&self) -> ShardId {
        self.config.log_shard_id
    }
}
