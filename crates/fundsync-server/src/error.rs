//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::features::jobs::queries::{GetJobLogError, ListJobLogsError};
use crate::ingest::{StoreError, SubmissionError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Submission(e) => submission_status(e),
            AppError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Store(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            },
        }
    }
}

impl From<ListJobLogsError> for AppError {
    fn from(err: ListJobLogsError) -> Self {
        match err {
            ListJobLogsError::InvalidFilter { .. } => AppError::BadRequest(err.to_string()),
            ListJobLogsError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<GetJobLogError> for AppError {
    fn from(err: GetJobLogError) -> Self {
        match err {
            GetJobLogError::InvalidId(_) => AppError::BadRequest(err.to_string()),
            GetJobLogError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetJobLogError::Store(e) => AppError::Store(e),
        }
    }
}

fn submission_status(err: &SubmissionError) -> (StatusCode, &'static str) {
    let code = match err {
        SubmissionError::FileTooLarge { .. } => return (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
        SubmissionError::Store(_) | SubmissionError::Spool(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        },
        SubmissionError::UnknownUploadType(_) => "UNKNOWN_UPLOAD_TYPE",
        SubmissionError::UnknownFetchType(_) => "UNKNOWN_JOB_TYPE",
        SubmissionError::UnsupportedProcessMode(_) => "UNSUPPORTED_PROCESS_MODE",
        SubmissionError::UnsupportedFileType(_) => "UNSUPPORTED_FILE_TYPE",
        SubmissionError::FileTypeMismatch { .. } => "FILE_TYPE_MISMATCH",
        SubmissionError::MissingField(_) => "MISSING_FIELD",
        SubmissionError::EmptyFile => "EMPTY_FILE",
        SubmissionError::Unreadable(_) => "UNREADABLE_FILE",
        SubmissionError::HeaderMismatch { .. } => "HEADER_MISMATCH",
        SubmissionError::NoDataRows => "NO_DATA_ROWS",
        SubmissionError::AdapterNotConfigured(_) => "ADAPTER_NOT_CONFIGURED",
    };
    (StatusCode::BAD_REQUEST, code)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "An internal error occurred".to_string()
        } else {
            match &self {
                AppError::NotFound(msg) | AppError::BadRequest(msg) => msg.clone(),
                other => other.to_string(),
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
