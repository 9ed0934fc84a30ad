//! ADREP Ingest Library
//!
//! Asynchronous ingestion of ad inventory CSV reports.
//!
//! # Pipeline
//!
//! - **Header resolution**: display names are mapped to canonical columns and
//!   all eleven dimension columns are required
//! - **Two-pass parse**: rows are counted first, then parsed and validated one
//!   by one; bad rows are counted and skipped
//! - **Chunked persistence**: valid records are grouped into batches and
//!   upserted concurrently through an [`UpsertSink`]
//! - **Job tracking**: status and progress can be polled while a job runs
//!
//! # Example
//!
//! ```no_run
//! use adrep_ingest::{ImportOrchestrator, IngestConfig, MemorySink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ImportOrchestrator::new(IngestConfig::default(), Arc::new(MemorySink::new()));
//!     let bytes = std::fs::read("report.csv")?;
//!     let job_id = orchestrator.submit(bytes, "report.csv")?;
//!     println!("{}", orchestrator.status(job_id));
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod chunk;
pub mod config;
pub mod error;
pub mod headers;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod storage;
pub mod tracker;
pub mod worker;

pub use config::{IngestConfig, StorageBackend};
pub use error::{HeaderError, IngestError, RowError, StorageError};
pub use models::{AdReportRecord, Column, DimensionKey, JobId, Measures};
pub use orchestrator::ImportOrchestrator;
pub use progress::{Phase, ProgressSnapshot};
pub use storage::{MemorySink, PgUpsertSink, UpsertSink};
pub use tracker::{CompletionSummary, JobStatus, JobTracker, FAILED_PREFIX, NOT_FOUND};
