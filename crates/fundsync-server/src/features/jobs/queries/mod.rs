//! Job log queries

pub mod get_job_log;
pub mod list_job_logs;

pub use get_job_log::{GetJobLogError, GetJobLogQuery};
pub use list_job_logs::{ListJobLogsError, ListJobLogsQuery};
