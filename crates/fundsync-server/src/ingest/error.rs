//! Error kinds of the ingestion pipeline
//!
//! - [`SubmissionError`]: the request is rejected before any job exists.
//! - [`RecordError`]: one record is rejected; the job carries on.
//! - [`EngineAbort`]: the job as a whole cannot continue and ends FAILED.

use thiserror::Error;

use super::store::StoreError;

/// Synchronous rejection of a submission
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Unknown upload type: {0}")]
    UnknownUploadType(String),

    #[error("Unknown fetch job type: {0}")]
    UnknownFetchType(String),

    #[error("Unsupported process mode '{0}', only QUEUE is accepted")]
    UnsupportedProcessMode(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File '{file_name}' does not look like a {file_type} file")]
    FileTypeMismatch { file_name: String, file_type: String },

    #[error("Field '{0}' is required")]
    MissingField(&'static str),

    #[error("File is empty")]
    EmptyFile,

    #[error("File exceeds the maximum upload size of {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("File could not be read: {0}")]
    Unreadable(String),

    #[error("Header does not match the {upload_type} layout: {reason}")]
    HeaderMismatch { upload_type: String, reason: String },

    #[error("File contains no data rows")]
    NoDataRows,

    #[error("No source adapter is configured for {0}")]
    AdapterNotConfigured(String),

    #[error("Failed to persist submission: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to spool upload: {0}")]
    Spool(#[source] std::io::Error),
}

impl SubmissionError {
    /// Whether the caller is at fault (as opposed to the service)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SubmissionError::Store(_) | SubmissionError::Spool(_))
    }
}

/// Defect of a single record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{field} is required")]
    MissingField { field: String },

    #[error("{field} has invalid value '{value}': expected {expected}")]
    InvalidField {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("row is not readable: {0}")]
    Unreadable(String),

    #[error("{0}")]
    DomainRule(String),

    #[error("{kind} '{key}' referenced by {field} does not exist")]
    MissingReference {
        field: &'static str,
        kind: &'static str,
        key: String,
    },

    #[error("{0}")]
    Conflict(String),
}

impl RecordError {
    pub fn missing(field: impl Into<String>) -> Self {
        RecordError::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, value: impl Into<String>, expected: &'static str) -> Self {
        RecordError::InvalidField {
            field: field.into(),
            value: value.into(),
            expected,
        }
    }
}

/// Job-level failure
#[derive(Debug, Error)]
pub enum EngineAbort {
    #[error("Source transport failure: {0}")]
    Transport(String),

    #[error("Source is malformed: {0}")]
    Structural(String),

    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Worker panicked: {0}")]
    Panicked(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),
}
