//! Submit a file upload job

use mediator::Request;

use super::JobAccepted;
use crate::ingest::{JobGateway, SpooledFile, SubmissionError, UploadSubmission};

/// Multipart form of an upload, with the file already spooled
#[derive(Debug, Default)]
pub struct SubmitUploadCommand {
    pub upload_type: Option<String>,
    pub source: Option<String>,
    pub process_mode: Option<String>,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub file: Option<SpooledFile>,
    pub submitted_by: Option<String>,
}

impl Request<Result<JobAccepted, SubmissionError>> for SubmitUploadCommand {}

impl From<SubmitUploadCommand> for UploadSubmission {
    fn from(cmd: SubmitUploadCommand) -> Self {
        UploadSubmission {
            upload_type: cmd.upload_type,
            source: cmd.source,
            process_mode: cmd.process_mode,
            file_type: cmd.file_type,
            file_name: cmd.file_name,
            file: cmd.file,
            submitted_by: cmd.submitted_by,
        }
    }
}

#[tracing::instrument(skip(gateway, command), fields(upload_type = ?command.upload_type))]
pub async fn handle(gateway: &JobGateway, command: SubmitUploadCommand) -> Result<JobAccepted, SubmissionError> {
    let job_id = gateway.submit_upload(command.into()).await?;
    Ok(JobAccepted::pending(job_id))
}
