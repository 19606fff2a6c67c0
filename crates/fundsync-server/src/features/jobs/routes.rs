//! Job routes
//!
//! - `POST /jobs/uploads` - multipart file upload
//! - `POST /jobs/fetches` - external catalog fetch
//! - `GET /job-logs` - paginated job log summaries
//! - `GET /job-logs/:log_id` - one job log with its error entries

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;

use super::commands::{self, SubmitFetchCommand, SubmitUploadCommand};
use super::queries::{self, GetJobLogQuery, ListJobLogsQuery};
use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::features::FeatureState;
use crate::ingest::{JobGateway, SpooledFile, SubmissionError};

/// Room for multipart boundaries and the text fields around the file
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create job routes
pub fn jobs_routes(max_upload_bytes: u64) -> Router<FeatureState> {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/jobs/uploads",
            post(submit_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/jobs/fetches", post(submit_fetch))
        .route("/job-logs", get(list_job_logs))
        .route("/job-logs/:log_id", get(get_job_log))
}

fn multipart_error(err: MultipartError) -> SubmissionError {
    SubmissionError::Unreadable(err.body_text())
}

/// POST /jobs/uploads
#[tracing::instrument(skip(state, multipart))]
async fn submit_upload(
    State(state): State<FeatureState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut command = SubmitUploadCommand::default();

    let read = read_upload_form(&state.gateway, &mut multipart, &mut command).await;
    if let Err(e) = read {
        if let Some(file) = command.file.take() {
            file.discard().await;
        }
        return Err(e.into());
    }

    let accepted = commands::submit_upload::handle(&state.gateway, command).await?;
    Ok(ApiResponse::success(accepted).with_status(StatusCode::ACCEPTED))
}

async fn read_upload_form(
    gateway: &JobGateway,
    multipart: &mut Multipart,
    command: &mut SubmitUploadCommand,
) -> Result<(), SubmissionError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                command.file_name = field.file_name().map(str::to_string);
                let spooled = spool_field(gateway, field).await?;
                if let Some(previous) = command.file.replace(spooled) {
                    previous.discard().await;
                }
            },
            "uploadType" => command.upload_type = Some(text(field).await?),
            "source" => command.source = Some(text(field).await?),
            "processMode" => command.process_mode = Some(text(field).await?),
            "fileType" => command.file_type = Some(text(field).await?),
            "submittedBy" => command.submitted_by = Some(text(field).await?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }
    Ok(())
}

async fn spool_field(gateway: &JobGateway, field: Field<'_>) -> Result<SpooledFile, SubmissionError> {
    let limit = gateway.max_upload_bytes();
    let chunks = field.map_err(move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            SubmissionError::FileTooLarge { limit }
        } else {
            multipart_error(e)
        }
    });
    gateway.spool(chunks).await
}

async fn text(field: Field<'_>) -> Result<String, SubmissionError> {
    field.text().await.map_err(multipart_error)
}

/// POST /jobs/fetches
#[tracing::instrument(skip(state, body))]
async fn submit_fetch(
    State(state): State<FeatureState>,
    body: Result<Json<SubmitFetchCommand>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(command) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let accepted = commands::submit_fetch::handle(&state.gateway, command).await?;
    Ok(ApiResponse::success(accepted).with_status(StatusCode::ACCEPTED))
}

/// GET /job-logs?page=1&limit=20&logType=DATA_UPLOAD&jobType=HOLDINGS&status=FAILED
#[tracing::instrument(skip(state, query))]
async fn list_job_logs(
    State(state): State<FeatureState>,
    query: Result<Query<ListJobLogsQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let page = queries::list_job_logs::handle(state.logs.clone(), query).await?;
    Ok(ApiResponse::success(page).with_status(StatusCode::OK))
}

/// GET /job-logs/:log_id
#[tracing::instrument(skip(state))]
async fn get_job_log(
    State(state): State<FeatureState>,
    Path(log_id): Path<String>,
) -> Result<Response, AppError> {
    let log = queries::get_job_log::handle(state.logs.clone(), GetJobLogQuery { log_id }).await?;
    Ok(ApiResponse::success(log).with_status(StatusCode::OK))
}
