//! Job submission and job log feature
//!
//! Submission is fire-and-poll: a command returns as soon as the job is
//! accepted, and its outcome is read back through the job log queries.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::jobs_routes;
