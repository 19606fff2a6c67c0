//! Job commands

pub mod submit_fetch;
pub mod submit_upload;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::JobStatus;

pub use submit_fetch::SubmitFetchCommand;
pub use submit_upload::SubmitUploadCommand;

/// Acknowledgement of an accepted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

impl JobAccepted {
    pub fn pending(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
        }
    }
}
