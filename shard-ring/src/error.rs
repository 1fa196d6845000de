use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`HashRing`](crate::HashRing) and
/// [`ShardRouter`](crate::ShardRouter).
#[derive(Error, Debug)]
pub enum Error {
    /// Key was empty; rejected before hashing.
    #[error("Invalid key: key must not be empty")]
    InvalidKey,

    /// Shard name failed validation; the ring was left unchanged.
    #[error("Invalid shard name: {0:?}")]
    InvalidShardName(String),

    #[error("Ring has no shards")]
    EmptyRing,

    /// The ring named a shard that has no pool entry.
    #[error("Shard unavailable: no connection for {0}")]
    ShardUnavailable(String),

    /// The owning shard has no entry for this key. Other shards are not consulted.
    #[error("Key {key:?} not found on shard {shard}")]
    KeyNotFound { shard: String, key: String },

    #[error("Backend error on shard {shard}: {source}")]
    Backend {
        shard: String,
        #[source]
        source: BackendError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn backend(shard: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            shard: shard.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Name of the shard this error happened on, if any.
    pub fn shard(&self) -> Option<&str> {
        match self {
            Self::ShardUnavailable(shard)
            | Self::KeyNotFound { shard, .. }
            | Self::Backend { shard, .. } => Some(shard),
            _ => None,
        }
    }
}

/// Failures reported by a single storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The backend refused the operation (e.g. schema not bootstrapped).
    #[error("Rejected by backend: {0}")]
    Rejected(String),
}
