//! Client for the replicated log service (`C3`).
//!
//! [`LogServiceClient`] is a synchronous-use, auto-retrying façade over a
//! Raft-like replicated log cluster. It hides topology discovery, leader
//! failover, and transient shard-unavailability behind `append` / `read` /
//! `truncate` / `get_tso_timestamp`. A single client is for serialized use;
//! parallelism comes from creating more clients (`§4.3`).

mod client;
mod config;
mod discovery;
mod error;
mod transport;
mod wire;

pub use client::LogServiceClient;
pub use config::LogClientConfig;
pub use discovery::{Discovery, StaticDiscovery};
pub use error::LogClientError;
pub use wire::{LogRecord, RecordType};

#[cfg(any(test, feature = "test-support"))]
pub mod mock;
