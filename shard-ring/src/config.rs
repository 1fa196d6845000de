use crate::ring::DEFAULT_REPLICAS;
use crate::Error;
use std::time::Duration;

/// Default number of health probes attempted when a shard is added.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 5;

/// Default delay between two probes of the same shard.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Default bound on a single backend call (probe, bootstrap, read, write).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single shard's probe while building stats.
pub const DEFAULT_STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for [`ShardRouter`](crate::ShardRouter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Virtual nodes per shard.
    pub replicas: usize,
    /// Probes attempted by a shard's init task before it is marked degraded.
    pub probe_attempts: u32,
    /// Fixed delay between init probes.
    pub probe_interval: Duration,
    pub operation_timeout: Duration,
    pub stats_timeout: Duration,
    /// When set, degraded shards are re-probed on this interval.
    pub health_check_interval: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            stats_timeout: DEFAULT_STATS_TIMEOUT,
            health_check_interval: None,
        }
    }
}

impl RouterConfig {
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_probe_attempts(mut self, attempts: u32) -> Self {
        self.probe_attempts = attempts;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_stats_timeout(mut self, timeout: Duration) -> Self {
        self.stats_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Reject values the router cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.replicas == 0 {
            return Err(Error::config("replicas must be at least 1"));
        }
        if self.probe_attempts == 0 {
            return Err(Error::config("probe_attempts must be at least 1"));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::config("operation_timeout must be non-zero"));
        }
        if self.stats_timeout.is_zero() {
            return Err(Error::config("stats_timeout must be non-zero"));
        }
        if self.health_check_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config("health_check_interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_proxy_behavior() {
        let config = RouterConfig::default();
        assert_eq!(config.replicas, 50);
        assert_eq!(config.probe_attempts, 5);
        assert_eq!(config.probe_interval, Duration::from_secs(2));
        assert_eq!(config.health_check_interval, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = RouterConfig::default()
            .with_replicas(10)
            .with_probe_attempts(2)
            .with_probe_interval(Duration::from_millis(5))
            .with_operation_timeout(Duration::from_millis(50))
            .with_stats_timeout(Duration::from_millis(20))
            .with_health_check_interval(Some(Duration::from_secs(1)));

        assert_eq!(config.replicas, 10);
        assert_eq!(config.probe_attempts, 2);
        assert_eq!(config.probe_interval, Duration::from_millis(5));
        assert_eq!(config.operation_timeout, Duration::from_millis(50));
        assert_eq!(config.stats_timeout, Duration::from_millis(20));
        assert_eq!(config.health_check_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let invalid = [
            RouterConfig::default().with_replicas(0),
            RouterConfig::default().with_probe_attempts(0),
            RouterConfig::default().with_operation_timeout(Duration::ZERO),
            RouterConfig::default().with_stats_timeout(Duration::ZERO),
            RouterConfig::default().with_health_check_interval(Some(Duration::ZERO)),
        ];

        for config in invalid {
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }
}
