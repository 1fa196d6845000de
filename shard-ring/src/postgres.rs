//! PostgreSQL shard backend.
//!
//! Each shard is a separate PostgreSQL server holding one `shard_data`
//! table. Pools are created with `connect_lazy_with`, so adding a shard
//! never blocks on the network; the router's init task is what first
//! touches the server.

use crate::backend::{ShardBackend, ShardConnector, StoredEntry};
use crate::error::BackendError;
use crate::ring::validate_shard_name;
use crate::Error;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Table holding key/value rows on every shard.
pub const DEFAULT_TABLE: &str = "shard_data";

/// SQL executed by [`PgShard::bootstrap`]. Safe to run repeatedly.
pub const SCHEMA_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS shard_data (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// A shard backed by a lazily connected PostgreSQL pool.
pub struct PgShard {
    pool: PgPool,
}

impl PgShard {
    /// Create a shard without opening any connection.
    pub fn connect_lazy(options: PgConnectOptions, settings: &PgSettings) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(0)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .connect_lazy_with(options);
        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ShardBackend for PgShard {
    async fn bootstrap(&self) -> Result<(), BackendError> {
        sqlx::query(SCHEMA_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<(), BackendError> {
        sqlx::query(&format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            DEFAULT_TABLE
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(&format!(
            "SELECT key, value, created_at FROM {} WHERE key = $1",
            DEFAULT_TABLE
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(key, value, created_at)| StoredEntry {
            key,
            value,
            created_at,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Credentials and pool sizing shared by every shard.
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Where a shard name points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEndpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl ShardEndpoint {
    /// Parse `host` or `host:port`.
    pub fn parse(address: &str) -> Result<Self, Error> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::config("empty shard address"));
        }

        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::config(format!("invalid port in {:?}", address)))?;
                Ok(Self {
                    host: host.to_string(),
                    port: Some(port),
                })
            }
            Some(_) => Err(Error::config(format!("missing host in {:?}", address))),
            None => Ok(Self {
                host: address.to_string(),
                port: None,
            }),
        }
    }
}

/// Parse one `SHARDS` list entry: `name` or `name=host[:port]`.
pub fn parse_shard_entry(entry: &str) -> Result<(String, Option<ShardEndpoint>), Error> {
    let entry = entry.trim();
    let (name, endpoint) = match entry.split_once('=') {
        Some((name, address)) => (name.trim(), Some(ShardEndpoint::parse(address)?)),
        None => (entry, None),
    };
    validate_shard_name(name)?;
    Ok((name.to_string(), endpoint))
}

/// Opens a [`PgShard`] per shard name.
///
/// A shard resolves to its configured endpoint, or else to a host of the
/// same name on the default port (the shard name is its DNS name).
pub struct PgConnector {
    settings: PgSettings,
    endpoints: HashMap<String, ShardEndpoint>,
}

impl PgConnector {
    pub fn new(settings: PgSettings) -> Self {
        Self {
            settings,
            endpoints: HashMap::new(),
        }
    }

    /// Route `shard` to an explicit endpoint.
    pub fn with_endpoint(mut self, shard: impl Into<String>, endpoint: ShardEndpoint) -> Self {
        self.endpoints.insert(shard.into(), endpoint);
        self
    }

    pub fn settings(&self) -> &PgSettings {
        &self.settings
    }

    /// Connect options for `shard`, without connecting.
    pub fn connect_options(&self, shard: &str) -> PgConnectOptions {
        let (host, port) = match self.endpoints.get(shard) {
            Some(endpoint) => (
                endpoint.host.as_str(),
                endpoint.port.unwrap_or(self.settings.port),
            ),
            None => (shard, self.settings.port),
        };

        PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.settings.user)
            .password(&self.settings.password)
            .database(&self.settings.database)
    }
}

impl ShardConnector for PgConnector {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>, Error> {
        validate_shard_name(shard)?;
        let options = self.connect_options(shard);
        tracing::debug!(%shard, host = %options.get_host(), port = options.get_port(), "creating lazy shard pool");
        Ok(Arc::new(PgShard::connect_lazy(options, &self.settings)))
    }
}
