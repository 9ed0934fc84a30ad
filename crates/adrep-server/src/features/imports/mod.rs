//! Imports feature module
//!
//! HTTP access to the ingestion pipeline: submit, status, progress, cancel.

pub mod routes;

#[cfg(test)]
mod routes_test;

pub use routes::imports_routes;
