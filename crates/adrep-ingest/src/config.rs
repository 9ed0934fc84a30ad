//! Ingestion configuration
//!
//! Values come from `INGEST_*` environment variables, falling back to the
//! defaults below.

use adrep_common::{AdrepError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::chunk::DEFAULT_BATCH_SIZE;

// ============================================================================
// Defaults
// ============================================================================

/// Default number of jobs accepted for concurrent execution.
pub const DEFAULT_JOB_WORKERS: usize = 5;

/// Default number of batches persisted concurrently.
pub const DEFAULT_PERSISTENCE_WORKERS: usize = 4;

/// Default number of rows between progress counter flushes.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Default grace period for running jobs at shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60;

/// Default time a finished job stays queryable, in seconds.
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;

/// Default interval between retention sweeps, in seconds.
pub const DEFAULT_RETENTION_SWEEP_SECS: u64 = 60;

/// Where parsed records are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AdrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(AdrepError::config(format!("Unknown storage backend: {}", other))),
        }
    }
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub job_workers: usize,
    pub persistence_workers: usize,
    pub progress_interval: u64,
    pub shutdown_grace_secs: u64,
    pub job_retention_secs: u64,
    pub retention_sweep_secs: u64,
    pub storage: StorageBackend,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            job_workers: DEFAULT_JOB_WORKERS,
            persistence_workers: DEFAULT_PERSISTENCE_WORKERS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            job_retention_secs: DEFAULT_JOB_RETENTION_SECS,
            retention_sweep_secs: DEFAULT_RETENTION_SWEEP_SECS,
            storage: StorageBackend::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| AdrepError::config(format!("Invalid value for {}: {}", name, value))),
        Err(_) => Ok(default),
    }
}

impl IngestConfig {
    /// Load from the environment (and `.env` if present) and validate
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let storage = match std::env::var("INGEST_STORAGE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.storage,
        };

        let config = Self {
            batch_size: env_or("INGEST_BATCH_SIZE", defaults.batch_size)?,
            job_workers: env_or("INGEST_JOB_WORKERS", defaults.job_workers)?,
            persistence_workers: env_or(
                "INGEST_PERSISTENCE_WORKERS",
                defaults.persistence_workers,
            )?,
            progress_interval: env_or("INGEST_PROGRESS_INTERVAL", defaults.progress_interval)?,
            shutdown_grace_secs: env_or(
                "INGEST_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace_secs,
            )?,
            job_retention_secs: env_or("INGEST_JOB_RETENTION_SECS", defaults.job_retention_secs)?,
            retention_sweep_secs: env_or(
                "INGEST_RETENTION_SWEEP_SECS",
                defaults.retention_sweep_secs,
            )?,
            storage,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AdrepError::config("Batch size must be greater than 0"));
        }

        if self.job_workers == 0 {
            return Err(AdrepError::config("Job workers must be greater than 0"));
        }

        if self.persistence_workers == 0 {
            return Err(AdrepError::config("Persistence workers must be greater than 0"));
        }

        if self.progress_interval == 0 {
            return Err(AdrepError::config("Progress interval must be greater than 0"));
        }

        if self.retention_sweep_secs == 0 {
            return Err(AdrepError::config("Retention sweep interval must be greater than 0"));
        }

        if self.persistence_workers >= self.job_workers {
            warn!(
                job_workers = self.job_workers,
                persistence_workers = self.persistence_workers,
                "Persistence pool is not smaller than the job pool"
            );
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn retention_sweep(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 5000);
        assert!(config.persistence_workers < config.job_workers);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let cases: [fn(&mut IngestConfig); 5] = [
            |c| c.batch_size = 0,
            |c| c.job_workers = 0,
            |c| c.persistence_workers = 0,
            |c| c.progress_interval = 0,
            |c| c.retention_sweep_secs = 0,
        ];

        for apply in cases {
            let mut config = IngestConfig::default();
            apply(&mut config);
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_large_persistence_pool_is_accepted() {
        let config = IngestConfig {
            job_workers: 2,
            persistence_workers: 8,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("PostgreSQL".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }
}
