use crate::backend::{Entry, ShardBackend, ShardConnector, StoredEntry};
use crate::error::BackendError;
use crate::ring::validate_shard_name;
use crate::{Error, HashRing, RouterConfig};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Placement algorithm reported by [`ShardRouter::stats`].
pub const ALGORITHM: &str = "consistent_hashing";

const EVENT_CHANNEL_CAPACITY: usize = 64;
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Connection state of one shard.
///
/// `Unknown -> Connecting -> Ready | Degraded`. `Ready` and `Degraded` flip
/// on later probe or operation outcomes for as long as the shard stays in
/// the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Unknown,
    Connecting,
    Ready,
    Degraded,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of the latest liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardHealth {
    Up,
    Down,
}

/// Membership and health change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    Joined(String),
    Left(String),
    StatusChanged { shard: String, status: ShardStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardReport {
    pub health: ShardHealth,
    pub status: ShardStatus,
}

/// Best-effort health snapshot of every shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub shards: BTreeMap<String, ShardReport>,
    pub total_shards: usize,
    pub algorithm: &'static str,
}

impl RouterStats {
    pub fn is_up(&self, shard: &str) -> bool {
        self.shards
            .get(shard)
            .is_some_and(|report| report.health == ShardHealth::Up)
    }

    pub fn up_count(&self) -> usize {
        self.shards
            .values()
            .filter(|report| report.health == ShardHealth::Up)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub shard: String,
    pub entry: Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadReceipt {
    pub shard: String,
    pub entry: StoredEntry,
}

/// Live handle to one shard. Cloned out of the pool so backend I/O never
/// runs under the membership lock.
struct ShardHandle {
    name: String,
    /// Distinguishes this pool entry from earlier ones with the same name.
    id: u64,
    backend: Arc<dyn ShardBackend>,
    bootstrapped: OnceCell<()>,
}

struct PoolEntry {
    handle: Arc<ShardHandle>,
    status: ShardStatus,
    cancel: CancellationToken,
}

/// Ring and pool change together, under one lock.
struct Membership {
    ring: HashRing,
    pool: HashMap<String, PoolEntry>,
}

struct Shared {
    config: RouterConfig,
    connector: Arc<dyn ShardConnector>,
    membership: RwLock<Membership>,
    next_id: AtomicU64,
    cancel_token: CancellationToken,
    event_tx: broadcast::Sender<ShardEvent>,
}

/// Routes keys to shards over a consistent hash ring and owns one backend
/// connection per shard.
///
/// Every shard added gets a bounded init task that probes it, bootstraps
/// its schema once, and records `Ready` or `Degraded`. A shard that is down
/// never blocks the others; operations against it fail with
/// [`Error::Backend`].
pub struct ShardRouter {
    shared: Arc<Shared>,
    health_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ShardRouter {
    /// Seed the ring with `shards` and start connecting to each of them.
    ///
    /// Returns once the ring and pool are populated; connections come up in
    /// the background.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyRing`] when `shards` is empty, [`Error::InvalidShardName`]
    /// for a malformed name, [`Error::Config`] for an unusable config.
    pub async fn start<I, S>(
        config: RouterConfig,
        connector: Arc<dyn ShardConnector>,
        shards: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        let shards: Vec<String> = shards.into_iter().map(Into::into).collect();
        if shards.is_empty() {
            return Err(Error::EmptyRing);
        }

        let health_check_interval = config.health_check_interval;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            membership: RwLock::new(Membership {
                ring: HashRing::new(config.replicas),
                pool: HashMap::new(),
            }),
            config,
            connector,
            next_id: AtomicU64::new(0),
            cancel_token: CancellationToken::new(),
            event_tx,
        });

        shared.add_shards(&shards).await?;

        let health_handle = health_check_interval
            .map(|interval| Self::spawn_health_task(shared.clone(), interval));

        tracing::info!(
            shards = shards.len(),
            replicas = shared.config.replicas,
            "Shard router started"
        );

        Ok(Self {
            shared,
            health_handle: Mutex::new(health_handle),
        })
    }

    fn spawn_health_task(shared: Arc<Shared>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // First tick completes immediately; init tasks cover startup.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = shared.cancel_token.cancelled() => {
                        tracing::debug!("Health check task shutting down");
                        break;
                    }

                    _ = timer.tick() => {
                        let degraded = shared.handles_with_status(ShardStatus::Degraded).await;
                        if degraded.is_empty() {
                            tracing::trace!("Health check: no degraded shards");
                            continue;
                        }

                        tracing::debug!(count = degraded.len(), "Re-probing degraded shards");
                        let timeout = shared.config.operation_timeout;
                        tokio::select! {
                            _ = shared.cancel_token.cancelled() => break,
                            _ = shared.clone().probe_all(degraded, timeout) => {}
                        }
                    }
                }
            }
        })
    }

    /// Store `value` under `key` on the shard that owns `key`.
    ///
    /// A degraded shard is still tried; only the real outcome counts.
    pub async fn write(&self, key: &str, value: &str) -> Result<WriteReceipt, Error> {
        let handle = self.shared.route(key).await?;

        let result = match self.shared.ensure_bootstrapped(&handle).await {
            Ok(()) => self.shared.bounded(handle.backend.upsert(key, value)).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.shared.record_outcome(&handle, true).await;
                tracing::debug!(shard = %handle.name, %key, "Write routed");
                Ok(WriteReceipt {
                    shard: handle.name.clone(),
                    entry: Entry {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                })
            }
            Err(e) => {
                tracing::warn!(shard = %handle.name, %key, error = %e, "Write failed");
                self.shared.record_outcome(&handle, false).await;
                Err(Error::backend(&handle.name, e))
            }
        }
    }

    /// Look `key` up on the shard that owns it.
    ///
    /// Absence on the owning shard is [`Error::KeyNotFound`]; no other shard
    /// is consulted.
    pub async fn read(&self, key: &str) -> Result<ReadReceipt, Error> {
        let handle = self.shared.route(key).await?;

        let result = match self.shared.ensure_bootstrapped(&handle).await {
            Ok(()) => self.shared.bounded(handle.backend.get(key)).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(found) => {
                self.shared.record_outcome(&handle, true).await;
                tracing::debug!(shard = %handle.name, %key, found = found.is_some(), "Read routed");
                match found {
                    Some(entry) => Ok(ReadReceipt {
                        shard: handle.name.clone(),
                        entry,
                    }),
                    None => Err(Error::KeyNotFound {
                        shard: handle.name.clone(),
                        key: key.to_string(),
                    }),
                }
            }
            Err(e) => {
                tracing::warn!(shard = %handle.name, %key, error = %e, "Read failed");
                self.shared.record_outcome(&handle, false).await;
                Err(Error::backend(&handle.name, e))
            }
        }
    }

    /// Probe every shard concurrently and report up/down per shard.
    ///
    /// Each probe is bounded by `stats_timeout`, so one hung shard only
    /// delays the report by that much. Never fails.
    pub async fn stats(&self) -> RouterStats {
        let handles = self.shared.handles().await;
        let results = self
            .shared
            .clone()
            .probe_all(handles, self.shared.config.stats_timeout)
            .await;

        let membership = self.shared.membership.read().await;
        let shards: BTreeMap<String, ShardReport> = results
            .into_iter()
            .filter_map(|(handle, up)| {
                let entry = membership.pool.get(&handle.name)?;
                (entry.handle.id == handle.id).then(|| {
                    let health = if up {
                        ShardHealth::Up
                    } else {
                        ShardHealth::Down
                    };
                    (
                        handle.name.clone(),
                        ShardReport {
                            health,
                            status: entry.status,
                        },
                    )
                })
            })
            .collect();

        RouterStats {
            total_shards: shards.len(),
            shards,
            algorithm: ALGORITHM,
        }
    }

    /// Add a shard to the ring and start connecting to it.
    ///
    /// Returns `false` if the shard was already present.
    pub async fn add_shard(&self, name: &str) -> Result<bool, Error> {
        let added = self.shared.add_shards(&[name.to_string()]).await?;
        Ok(!added.is_empty())
    }

    /// Remove a shard from the ring and tear its connection down.
    ///
    /// Returns `false` if the shard was not present.
    pub async fn remove_shard(&self, name: &str) -> Result<bool, Error> {
        validate_shard_name(name)?;

        let entry = {
            let mut membership = self.shared.membership.write().await;
            let removed = membership.ring.remove_shards([name]);
            let entry = membership.pool.remove(name);
            if removed.is_empty() != entry.is_none() {
                tracing::error!(shard = %name, "Ring and connection pool out of sync on removal");
            }
            entry
        };

        let Some(entry) = entry else {
            return Ok(false);
        };

        self.shared.teardown(entry).await;
        tracing::info!(shard = %name, "Removed shard");
        let _ = self.shared.event_tx.send(ShardEvent::Left(name.to_string()));
        Ok(true)
    }

    /// Which shard currently owns `key`.
    pub async fn locate(&self, key: &str) -> Result<String, Error> {
        let membership = self.shared.membership.read().await;
        membership.ring.locate(key).map(str::to_string)
    }

    pub async fn shards(&self) -> BTreeSet<String> {
        self.shared.membership.read().await.ring.shards()
    }

    pub async fn shard_count(&self) -> usize {
        self.shared.membership.read().await.ring.shard_count()
    }

    /// Current state of `name`, without probing.
    pub async fn shard_status(&self, name: &str) -> Option<ShardStatus> {
        let membership = self.shared.membership.read().await;
        membership.pool.get(name).map(|entry| entry.status)
    }

    /// Wait until no shard is `Unknown` or `Connecting`.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let settled = {
                let membership = self.shared.membership.read().await;
                membership.pool.values().all(|entry| {
                    matches!(entry.status, ShardStatus::Ready | ShardStatus::Degraded)
                })
            };
            if settled {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Subscribe to membership and status events.
    ///
    /// Events are sent after the change is visible through the router.
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    /// True until [`shutdown`](Self::shutdown) is called.
    pub fn is_live(&self) -> bool {
        !self.shared.cancel_token.is_cancelled()
    }

    /// Stop background tasks, empty the ring and close every shard.
    pub async fn shutdown(&self) {
        self.shared.cancel_token.cancel();

        let health_handle = self
            .health_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = health_handle {
            let _ = handle.await;
        }

        let entries: Vec<(String, PoolEntry)> = {
            let mut membership = self.shared.membership.write().await;
            let names: Vec<String> = membership.pool.keys().cloned().collect();
            membership.ring.remove_shards(&names);
            membership.pool.drain().collect()
        };

        let count = entries.len();
        for (name, entry) in entries {
            self.shared.teardown(entry).await;
            let _ = self.shared.event_tx.send(ShardEvent::Left(name));
        }

        tracing::debug!(closed = count, "Shard router shutdown complete");
    }
}

impl Drop for ShardRouter {
    fn drop(&mut self) {
        // Stops init and health tasks if shutdown was never called.
        self.shared.cancel_token.cancel();
    }
}

impl Shared {
    /// Add a batch of shards: ring and pool in one write-locked step, then
    /// one init task per new shard once the lock is released.
    async fn add_shards(self: &Arc<Self>, names: &[String]) -> Result<Vec<String>, Error> {
        for name in names {
            validate_shard_name(name)?;
        }

        let mut fresh: Vec<(Arc<ShardHandle>, CancellationToken)> = Vec::new();
        {
            let mut membership = self.membership.write().await;

            // Connect before touching the ring so a connector failure
            // leaves membership unchanged.
            let mut backends: Vec<(&str, Arc<dyn ShardBackend>)> = Vec::new();
            for name in names {
                let name = name.as_str();
                if membership.ring.contains(name) || backends.iter().any(|(n, _)| *n == name) {
                    continue;
                }
                backends.push((name, self.connector.connect(name)?));
            }

            membership
                .ring
                .add_shards(backends.iter().map(|(name, _)| *name))?;

            for (name, backend) in backends {
                let handle = Arc::new(ShardHandle {
                    name: name.to_string(),
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    backend,
                    bootstrapped: OnceCell::new(),
                });
                let cancel = self.cancel_token.child_token();
                membership.pool.insert(
                    name.to_string(),
                    PoolEntry {
                        handle: handle.clone(),
                        status: ShardStatus::Unknown,
                        cancel: cancel.clone(),
                    },
                );
                fresh.push((handle, cancel));
            }
        }

        let mut added = Vec::with_capacity(fresh.len());
        for (handle, cancel) in fresh {
            tracing::info!(shard = %handle.name, "Added shard");
            let _ = self.event_tx.send(ShardEvent::Joined(handle.name.clone()));
            added.push(handle.name.clone());
            tokio::spawn(self.clone().init_shard(handle, cancel));
        }

        Ok(added)
    }

    /// Probe a new shard up to `probe_attempts` times, `probe_interval`
    /// apart, then record the terminal status.
    async fn init_shard(self: Arc<Self>, handle: Arc<ShardHandle>, cancel: CancellationToken) {
        self.set_status(&handle, ShardStatus::Connecting).await;

        let attempts = self.config.probe_attempts;
        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(shard = %handle.name, "Shard init cancelled");
                    return;
                }
                result = self.probe(&handle) => result,
            };

            match result {
                Ok(()) => {
                    tracing::info!(shard = %handle.name, attempt, "Connected to shard");
                    self.set_status(&handle, ShardStatus::Ready).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        shard = %handle.name,
                        attempt,
                        attempts,
                        error = %e,
                        "Shard probe failed"
                    );
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.probe_interval) => {}
                }
            }
        }

        tracing::warn!(
            shard = %handle.name,
            attempts,
            "Could not connect to shard after retries, marking degraded"
        );
        self.set_status(&handle, ShardStatus::Degraded).await;
    }

    /// Ping, then bootstrap if that has not succeeded yet.
    async fn probe(&self, handle: &ShardHandle) -> Result<(), BackendError> {
        self.bounded(handle.backend.ping()).await?;
        self.ensure_bootstrapped(handle).await
    }

    /// Run the backend bootstrap exactly once per pool entry.
    async fn ensure_bootstrapped(&self, handle: &ShardHandle) -> Result<(), BackendError> {
        handle
            .bootstrapped
            .get_or_try_init(|| async {
                self.bounded(handle.backend.bootstrap()).await?;
                tracing::info!(shard = %handle.name, "Shard schema ready");
                Ok::<(), BackendError>(())
            })
            .await
            .map(|_| ())
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.config.operation_timeout;
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(timeout)),
        }
    }

    /// Probe `handles` concurrently, each bounded by `timeout`, and feed the
    /// results into the status machine.
    async fn probe_all(
        self: Arc<Self>,
        handles: Vec<Arc<ShardHandle>>,
        timeout: Duration,
    ) -> Vec<(Arc<ShardHandle>, bool)> {
        let mut results: Vec<(Arc<ShardHandle>, bool)> =
            handles.iter().map(|handle| (handle.clone(), false)).collect();

        let mut probes = JoinSet::new();
        for (index, handle) in handles.into_iter().enumerate() {
            let shared = self.clone();
            probes.spawn(async move {
                let up = matches!(
                    tokio::time::timeout(timeout, shared.probe(&handle)).await,
                    Ok(Ok(()))
                );
                shared.record_outcome(&handle, up).await;
                (index, up)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, up)) => results[index].1 = up,
                Err(e) => tracing::warn!(error = %e, "Shard probe task failed"),
            }
        }

        results
    }

    /// Resolve `key` to its shard's handle. Holds the read lock only for
    /// the lookup.
    async fn route(&self, key: &str) -> Result<Arc<ShardHandle>, Error> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let membership = self.membership.read().await;
        let shard = membership.ring.locate(key)?;
        match membership.pool.get(shard) {
            Some(entry) => Ok(entry.handle.clone()),
            None => {
                tracing::error!(%shard, "Ring names a shard with no connection pool entry");
                Err(Error::ShardUnavailable(shard.to_string()))
            }
        }
    }

    async fn handles(&self) -> Vec<Arc<ShardHandle>> {
        let membership = self.membership.read().await;
        membership
            .pool
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    async fn handles_with_status(&self, status: ShardStatus) -> Vec<Arc<ShardHandle>> {
        let membership = self.membership.read().await;
        membership
            .pool
            .values()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Move to `Ready` on success, `Degraded` on failure.
    async fn record_outcome(&self, handle: &ShardHandle, ok: bool) {
        let target = if ok {
            ShardStatus::Ready
        } else {
            ShardStatus::Degraded
        };

        let current = {
            let membership = self.membership.read().await;
            membership
                .pool
                .get(&handle.name)
                .filter(|entry| entry.handle.id == handle.id)
                .map(|entry| entry.status)
        };

        if current.is_some_and(|status| status != target) {
            self.set_status(handle, target).await;
        }
    }

    /// Write `status` for this exact pool entry. A handle whose entry was
    /// removed (or replaced by a re-add) is ignored.
    async fn set_status(&self, handle: &ShardHandle, status: ShardStatus) {
        let previous = {
            let mut membership = self.membership.write().await;
            match membership.pool.get_mut(&handle.name) {
                Some(entry) if entry.handle.id == handle.id && entry.status != status => {
                    Some(std::mem::replace(&mut entry.status, status))
                }
                _ => None,
            }
        };

        if let Some(previous) = previous {
            match status {
                ShardStatus::Degraded => {
                    tracing::warn!(shard = %handle.name, from = %previous, "Shard degraded")
                }
                ShardStatus::Ready if previous == ShardStatus::Degraded => {
                    tracing::info!(shard = %handle.name, "Shard recovered")
                }
                _ => tracing::debug!(shard = %handle.name, from = %previous, to = %status, "Shard status changed"),
            }
            let _ = self.event_tx.send(ShardEvent::StatusChanged {
                shard: handle.name.clone(),
                status,
            });
        }
    }

    /// Stop the entry's init task and close its backend.
    async fn teardown(&self, entry: PoolEntry) {
        entry.cancel.cancel();
        let timeout = self.config.operation_timeout;
        if tokio::time::timeout(timeout, entry.handle.backend.close())
            .await
            .is_err()
        {
            tracing::warn!(shard = %entry.handle.name, "Timed out closing shard connection");
        }
    }
}
