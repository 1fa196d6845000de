use clap::{Parser, ValueEnum};
use shard_ring::{parse_shard_entry, Error, PgConnector, PgSettings, RouterConfig};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "shard-proxy")]
#[command(about = "Routes key/value reads and writes to PostgreSQL shards by consistent hashing")]
#[command(version)]
pub struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Comma-separated shards: `name` or `name=host[:port]`
    #[arg(
        long,
        env = "SHARDS",
        default_value = "postgres-shard-0,postgres-shard-1,postgres-shard-2"
    )]
    pub shards: String,

    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    pub db_name: String,

    /// Port used for shards without an explicit one
    #[arg(long, env = "DB_PORT", default_value = "5432")]
    pub db_port: u16,

    /// Max pooled connections per shard
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value = "10")]
    pub db_max_connections: u32,

    /// Virtual nodes per shard
    #[arg(long, env = "VIRTUAL_NODES", default_value = "50")]
    pub virtual_nodes: usize,

    /// Probes attempted when a shard is added
    #[arg(long, env = "PROBE_ATTEMPTS", default_value = "5")]
    pub probe_attempts: u32,

    #[arg(long, env = "PROBE_INTERVAL_MS", default_value = "2000")]
    pub probe_interval_ms: u64,

    /// Bound on every shard operation
    #[arg(long, env = "OPERATION_TIMEOUT_MS", default_value = "5000")]
    pub operation_timeout_ms: u64,

    /// Bound on each shard probe made by /stats
    #[arg(long, env = "STATS_TIMEOUT_MS", default_value = "2000")]
    pub stats_timeout_ms: u64,

    /// Re-probe degraded shards on this interval (disabled when unset)
    #[arg(long, env = "HEALTH_CHECK_INTERVAL_SECS")]
    pub health_check_interval_secs: Option<u64>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn router_config(&self) -> Result<RouterConfig, Error> {
        let config = RouterConfig::default()
            .with_replicas(self.virtual_nodes)
            .with_probe_attempts(self.probe_attempts)
            .with_probe_interval(Duration::from_millis(self.probe_interval_ms))
            .with_operation_timeout(Duration::from_millis(self.operation_timeout_ms))
            .with_stats_timeout(Duration::from_millis(self.stats_timeout_ms))
            .with_health_check_interval(self.health_check_interval_secs.map(Duration::from_secs));
        config.validate()?;
        Ok(config)
    }

    pub fn pg_settings(&self) -> PgSettings {
        PgSettings {
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
            port: self.db_port,
            max_connections: self.db_max_connections,
            ..PgSettings::default()
        }
    }

    /// Shard names in list order, and a connector that knows their endpoints.
    pub fn connector(&self) -> Result<(Vec<String>, PgConnector), Error> {
        let mut connector = PgConnector::new(self.pg_settings());
        let mut names = Vec::new();

        for entry in self.shards.split(',').filter(|s| !s.trim().is_empty()) {
            let (name, endpoint) = parse_shard_entry(entry)?;
            if let Some(endpoint) = endpoint {
                connector = connector.with_endpoint(name.clone(), endpoint);
            }
            names.push(name);
        }

        if names.is_empty() {
            return Err(Error::EmptyRing);
        }
        Ok((names, connector))
    }
}
