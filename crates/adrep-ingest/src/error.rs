//! Error types for the ingestion pipeline
//!
//! Errors fall into two families. [`RowError`] is recoverable: it is attributed
//! to a single row, counted, and processing moves on. Everything wrapped by
//! [`IngestError`] aborts the job and ends up in its `FAILED:` status line.

use adrep_common::AdrepError;
use thiserror::Error;

use crate::models::Column;

/// Header row is missing mandatory dimension columns
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("CSV header mismatch. Missing required columns: {}", join_columns(.0))]
    MissingColumns(Vec<Column>),
}

/// A single row failed conversion or validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("Invalid value '{value}' for column {column}: expected {expected}")]
    TypeMismatch {
        column: Column,
        value: String,
        expected: &'static str,
    },

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),

    #[error("Row has {found} cells but the header has {expected}")]
    ColumnCountMismatch { expected: usize, found: usize },

    #[error("Cell {cell} is not valid UTF-8")]
    InvalidEncoding { cell: usize },
}

/// Failure reported by an upsert sink
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Job-aborting failures
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Empty file or no header")]
    EmptyFile,

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("Unreadable CSV stream: {0}")]
    Csv(#[from] csv::Error),

    #[error("Batch {sequence} ({records} records) failed to persist: {source}")]
    Persistence {
        sequence: usize,
        records: usize,
        #[source]
        source: StorageError,
    },

    #[error("Import cancelled")]
    Cancelled,

    #[error("Importer is shutting down")]
    ShuttingDown,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] AdrepError),
}

fn join_columns(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|column| column.name())
        .collect::<Vec<_>>()
        .join(", ")
}
