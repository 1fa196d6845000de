//! In-process shard backend.
//!
//! [`MemoryShard`] behaves like a single-table database: it refuses reads
//! and writes until [`bootstrap`](ShardBackend::bootstrap) has run, and it
//! can be made unreachable or slow to exercise the router's degraded paths.

use crate::backend::{ShardBackend, ShardConnector, StoredEntry};
use crate::error::BackendError;
use crate::Error;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

/// In-memory shard with fault injection.
pub struct MemoryShard {
    name: String,
    table: RwLock<Option<HashMap<String, StoredEntry>>>,
    reachable: AtomicBool,
    latency: Mutex<Duration>,
    bootstrap_count: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: RwLock::new(None),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            bootstrap_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make every subsequent call succeed (`true`) or fail with
    /// [`BackendError::Unreachable`] (`false`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Number of times `bootstrap` succeeded.
    pub fn bootstrap_count(&self) -> usize {
        self.bootstrap_count.load(Ordering::Acquire)
    }

    /// Number of stored entries (0 before bootstrap).
    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn enter(&self) -> Result<(), BackendError> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::Acquire) {
            return Err(BackendError::Unreachable(self.name.clone()));
        }
        Ok(())
    }

    fn missing_table(&self) -> BackendError {
        BackendError::Rejected(format!("table does not exist on {}", self.name))
    }
}

#[async_trait::async_trait]
impl ShardBackend for MemoryShard {
    async fn bootstrap(&self) -> Result<(), BackendError> {
        self.enter().await?;
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.get_or_insert_with(HashMap::new);
        self.bootstrap_count.fetch_add(1, Ordering::AcqRel);
        debug!(shard = %self.name, "memory shard bootstrapped");
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.enter().await
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.enter().await?;
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let table = guard.as_mut().ok_or_else(|| self.missing_table())?;

        table
            .entry(key.to_string())
            .and_modify(|entry| entry.value = value.to_string())
            .or_insert_with(|| StoredEntry {
                key: key.to_string(),
                value: value.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        self.enter().await?;
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        let table = guard.as_ref().ok_or_else(|| self.missing_table())?;
        Ok(table.get(key).cloned())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Hands out one [`MemoryShard`] per shard name.
///
/// Shards outlive the router's pool entries: removing a shard and adding it
/// back reconnects to the same data, the way a real database would keep its
/// rows.
#[derive(Default)]
pub struct MemoryConnector {
    shards: Mutex<HashMap<String, Arc<MemoryShard>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard behind `name`, created on first use.
    pub fn shard(&self, name: &str) -> Arc<MemoryShard> {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        shards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryShard::new(name)))
            .clone()
    }
}

impl ShardConnector for MemoryConnector {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>, Error> {
        let backend: Arc<dyn ShardBackend> = self.shard(shard);
        Ok(backend)
    }
}
