//! ADREP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the ADREP workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`AdrepError`] and the [`Result`] alias used by configuration
//!   and logging code in every member crate
//! - **Logging**: [`logging::init_logging`] wires `tracing` to the console, a daily
//!   rolling file, or both
//!
//! # Example
//!
//! ```no_run
//! use adrep_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> adrep_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{AdrepError, Result};
