//! Fundsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment helpers and the logging subsystem used
//! by every fundsync workspace member.

pub mod env;
pub mod error;
pub mod logging;

pub use error::{FundsyncError, Result};
