//! Fundsync server library
//!
//! Exposes the HTTP surface and the ingestion pipeline so integration tests
//! and the `fundsync-server` binary share one wiring.

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

pub use error::AppError;
