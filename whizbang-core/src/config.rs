//! Deployment-wide configuration: the options named in the specification's
//! configuration table, assembled from defaults overridable by `WHIZBANG_*`
//! environment variables. No config-file crate is pulled in for this —
//! `Config` is a plain struct `serde` can also (de)serialize from whatever
//! format a host application already uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// `settings.sql_log_level`: gates what the Work-Coordinator Logging sink
/// persists. Ordered so that `level >= threshold` reads naturally as "at
/// least this severe."
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SqlLogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl SqlLogLevel {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => SqlLogLevel::Debug,
            1 => SqlLogLevel::Info,
            2 => SqlLogLevel::Warning,
            _ => SqlLogLevel::Error,
        }
    }
}

/// Topology and tuning knobs shared by every component in a Whizbang
/// deployment. Every field here maps directly onto a row of §6.4; defaults
/// match the specification's documented defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Number of partitions streams hash into. 16 for small deployments,
    /// 10_000 for large ones — the specification leaves the choice to the
    /// deployment; this crate defaults to the small-deployment value.
    pub partition_count: u32,
    /// Lease duration granted on claim.
    pub lease_seconds: u64,
    /// A non-heartbeating instance is reaped once its silence exceeds this.
    pub stale_threshold_seconds: u64,
    /// Worker-loop tick period.
    pub poll_interval: Duration,
    /// Batched coordinator strategy: flush at least this often...
    pub batch_flush_interval: Duration,
    /// ...or once this many queued operations accumulate, whichever first.
    pub batch_flush_size: usize,
    /// Bound of the serial executor's queue. `None` is unbounded.
    pub channel_capacity: Option<usize>,
    /// Gates what the coordinator's log sink persists.
    pub sql_log_level: SqlLogLevel,
    /// Terminal-failure threshold before a row's status gets the
    /// terminal-failure bit set.
    pub max_delivery_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            partition_count: 16,
            lease_seconds: 300,
            stale_threshold_seconds: 600,
            poll_interval: Duration::from_millis(500),
            batch_flush_interval: Duration::from_millis(50),
            batch_flush_size: 200,
            channel_capacity: None,
            sql_log_level: SqlLogLevel::Info,
            max_delivery_attempts: 5,
        }
    }
}

impl Config {
    /// Builds a `Config` from defaults overridden by any `WHIZBANG_*`
    /// environment variables that are set and parse cleanly; an unset or
    /// unparseable variable silently falls back to the default rather than
    /// failing startup, matching this workspace's convention of configuration
    /// being best-effort at the edges and strictly validated only where it
    /// actually gates behavior (the coordinator's lease/partition math).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            partition_count: env_var("WHIZBANG_PARTITION_COUNT", defaults.partition_count),
            lease_seconds: env_var("WHIZBANG_LEASE_SECONDS", defaults.lease_seconds),
            stale_threshold_seconds: env_var(
                "WHIZBANG_STALE_THRESHOLD_SECONDS",
                defaults.stale_threshold_seconds,
            ),
            poll_interval: Duration::from_millis(env_var(
                "WHIZBANG_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            batch_flush_interval: Duration::from_millis(env_var(
                "WHIZBANG_BATCH_FLUSH_INTERVAL_MS",
                defaults.batch_flush_interval.as_millis() as u64,
            )),
            batch_flush_size: env_var("WHIZBANG_BATCH_FLUSH_SIZE", defaults.batch_flush_size),
            channel_capacity: std::env::var("WHIZBANG_CHANNEL_CAPACITY")
                .ok()
                .and_then(|value| value.parse().ok()),
            sql_log_level: SqlLogLevel::from_code(env_var(
                "WHIZBANG_SQL_LOG_LEVEL",
                defaults.sql_log_level as u8,
            )),
            max_delivery_attempts: env_var(
                "WHIZBANG_MAX_DELIVERY_ATTEMPTS",
                defaults.max_delivery_attempts,
            ),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.partition_count, 16);
        assert_eq!(config.lease_seconds, 300);
        assert_eq!(config.stale_threshold_seconds, 600);
        assert_eq!(config.max_delivery_attempts, 5);
    }

    #[test]
    fn sql_log_level_orders_by_severity() {
        assert!(SqlLogLevel::Debug < SqlLogLevel::Error);
        assert!(SqlLogLevel::Warning > SqlLogLevel::Info);
    }
}
