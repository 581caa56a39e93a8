//! Worker configuration read from the environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use strata_core::outbox::RelayConfig;
use strata_core::projection::ProjectionConfig;
use strata_core::snapshot::SnapshotPolicy;

use crate::error::AppError;

/// Settings for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Interface the status API binds to.
    pub host: String,
    /// Port the status API binds to.
    pub port: u16,
    /// Pool size. A projection pass holds one connection for its claim
    /// while handlers and checkpoint writes use others, so at least 2.
    pub database_max_connections: u32,
    /// Events claimed per projection pass.
    pub projection_batch_size: i64,
    /// Sleep between projection passes.
    pub projection_poll_interval: Duration,
    /// Sleep between retry sweeps over failed projection events.
    pub retry_sweep_interval: Duration,
    /// Outbox entries claimed per relay pass.
    pub outbox_batch_size: i64,
    /// Sleep between relay passes.
    pub outbox_poll_interval: Duration,
    /// Publish attempts before an entry is dead-lettered.
    pub outbox_max_retries: i32,
    /// How long published outbox entries are kept.
    pub outbox_retention: TimeDelta,
    /// Events between order snapshots.
    pub snapshot_interval: i64,
}

impl WorkerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// fails to parse or validate.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// See [`WorkerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::Config("DATABASE_URL environment variable must be set".into())
        })?;

        let config = Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parsed(&lookup, "PORT", 3000)?,
            database_max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            projection_batch_size: parsed(&lookup, "PROJECTION_BATCH_SIZE", 100)?,
            projection_poll_interval: millis(&lookup, "PROJECTION_POLL_INTERVAL_MS", 1000)?,
            retry_sweep_interval: millis(&lookup, "RETRY_SWEEP_INTERVAL_MS", 30_000)?,
            outbox_batch_size: parsed(&lookup, "OUTBOX_BATCH_SIZE", 100)?,
            outbox_poll_interval: millis(&lookup, "OUTBOX_POLL_INTERVAL_MS", 1000)?,
            outbox_max_retries: parsed(&lookup, "OUTBOX_MAX_RETRIES", 5)?,
            outbox_retention: TimeDelta::hours(parsed(&lookup, "OUTBOX_RETENTION_HOURS", 168)?),
            snapshot_interval: parsed(&lookup, "SNAPSHOT_INTERVAL", 50)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.database_max_connections < 2 {
            return Err(AppError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 2".into(),
            ));
        }
        if self.projection_batch_size <= 0 || self.outbox_batch_size <= 0 {
            return Err(AppError::Config("batch sizes must be positive".into()));
        }
        if self.outbox_max_retries <= 0 {
            return Err(AppError::Config("OUTBOX_MAX_RETRIES must be positive".into()));
        }
        if self.projection_poll_interval.is_zero()
            || self.retry_sweep_interval.is_zero()
            || self.outbox_poll_interval.is_zero()
        {
            return Err(AppError::Config("poll intervals must be positive".into()));
        }
        Ok(())
    }

    /// The socket address the status API listens on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Projection manager tuning. Retry delays keep their defaults.
    #[must_use]
    pub fn projection_config(&self) -> ProjectionConfig {
        ProjectionConfig {
            batch_size: self.projection_batch_size,
            ..ProjectionConfig::default()
        }
    }

    /// Outbox relay tuning.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
            retention: self.outbox_retention,
        }
    }

    /// Snapshot cadence for order streams.
    #[must_use]
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::every(self.snapshot_interval)
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

fn millis<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, key, default).map(Duration::from_millis)
}
