//! Consistent-hashing router over independently addressable storage shards.
//!
//! This crate provides:
//! - A CRC-32 hash ring with virtual nodes ([`HashRing`])
//! - A router that owns one backend connection per shard and keeps the ring
//!   and the connection pool in lock-step ([`ShardRouter`])
//! - A PostgreSQL backend ([`PgShard`]) and an in-memory backend with fault
//!   injection ([`MemoryShard`])
//!
//! Shards are connected in the background. A shard that is down is marked
//! [`ShardStatus::Degraded`]; keys it owns fail with [`Error::Backend`]
//! while every other shard keeps serving.
//!
//! # Example
//!
//! ```rust,ignore
//! use shard_ring::{PgConnector, PgSettings, RouterConfig, ShardRouter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shard_ring::Error> {
//!     let connector = Arc::new(PgConnector::new(PgSettings::default()));
//!     let router = ShardRouter::start(
//!         RouterConfig::default(),
//!         connector,
//!         ["postgres-shard-0", "postgres-shard-1", "postgres-shard-2"],
//!     )
//!     .await?;
//!
//!     let written = router.write("user:42", "alice").await?;
//!     let read = router.read("user:42").await?;
//!     assert_eq!(written.shard, read.shard);
//!
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Placement
//!
//! Each shard owns [`DEFAULT_REPLICAS`] virtual nodes at
//! `crc32("{name}:{i}")`. A key belongs to the first virtual node clockwise
//! from `crc32(key)`. Adding or removing one shard only moves the keys that
//! shard gains or loses.
//!
//! Data is never migrated. After a membership change, keys that moved read
//! as missing from their new owner.

mod backend;
mod config;
mod error;
mod memory;
mod postgres;
mod ring;
mod router;

pub use backend::{Entry, ShardBackend, ShardConnector, StoredEntry};
pub use config::{
    RouterConfig, DEFAULT_OPERATION_TIMEOUT, DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL,
    DEFAULT_STATS_TIMEOUT,
};
pub use error::{BackendError, Error};
pub use memory::{MemoryConnector, MemoryShard};
pub use postgres::{
    parse_shard_entry, PgConnector, PgSettings, PgShard, ShardEndpoint, DEFAULT_TABLE,
    SCHEMA_TABLE_SQL,
};
pub use ring::{validate_shard_name, HashRing, Reassignment, DEFAULT_REPLICAS, MAX_SHARD_NAME_LEN};
pub use router::{
    ReadReceipt, RouterStats, ShardEvent, ShardHealth, ShardReport, ShardRouter, ShardStatus,
    WriteReceipt, ALGORITHM,
};
