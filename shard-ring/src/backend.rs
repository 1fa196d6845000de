//! Contract between the router and a storage shard.

use crate::error::BackendError;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A caller-supplied key/value pair, echoed back on a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

/// An entry as stored on a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// One storage shard, as seen by the router.
///
/// Implementations must be `Send + Sync`; the router shares a single handle
/// per shard across all tasks. Timeouts are applied by the router, so
/// implementations may block for as long as the underlying client does.
#[async_trait::async_trait]
pub trait ShardBackend: Send + Sync {
    /// Ensure the key/value table exists. Must be idempotent.
    async fn bootstrap(&self) -> Result<(), BackendError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Insert `key`, or overwrite its value if it already exists.
    async fn upsert(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Point lookup. Absence is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, BackendError>;

    /// Release connections. Called once when the shard leaves the router.
    async fn close(&self);
}

/// Opens backends for shard names.
///
/// `connect` must not perform I/O: the router calls it while holding its
/// membership write lock. Connections are expected to be established lazily
/// on first use.
pub trait ShardConnector: Send + Sync {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>, Error>;
}
