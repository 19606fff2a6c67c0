//! Submit an external catalog fetch job

use mediator::Request;
use serde::{Deserialize, Serialize};

use super::JobAccepted;
use crate::ingest::{FetchSubmission, JobGateway, SubmissionError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFetchCommand {
    /// One of the `FETCH_*` job types
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
}

impl Request<Result<JobAccepted, SubmissionError>> for SubmitFetchCommand {}

#[tracing::instrument(skip(gateway))]
pub async fn handle(gateway: &JobGateway, command: SubmitFetchCommand) -> Result<JobAccepted, SubmissionError> {
    let job_id = gateway
        .submit_fetch(FetchSubmission {
            job_type: command.job_type,
            submitted_by: command.submitted_by,
        })
        .await?;
    Ok(JobAccepted::pending(job_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_deserializes_camel_case() {
        let cmd: SubmitFetchCommand =
            serde_json::from_str(r#"{"jobType": "FETCH_AMCS", "submittedBy": "ops"}"#).unwrap();
        assert_eq!(cmd.job_type.as_deref(), Some("FETCH_AMCS"));
        assert_eq!(cmd.submitted_by.as_deref(), Some("ops"));
    }
}
