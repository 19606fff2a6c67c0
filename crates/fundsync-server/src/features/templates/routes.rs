//! Template routes

use axum::{
    extract::{Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::ingest::{schema, FileType, UploadType};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParams {
    /// `CSV` (default) or `TSV`
    pub file_type: Option<String>,
}

pub fn templates_routes() -> Router<()> {
    Router::new().route("/uploads/templates/:upload_type", get(download_template))
}

/// GET /uploads/templates/:upload_type?fileType=CSV
#[tracing::instrument]
async fn download_template(
    Path(upload_type): Path<String>,
    Query(params): Query<TemplateParams>,
) -> Result<Response, AppError> {
    let upload_type: UploadType = upload_type.parse().map_err(AppError::BadRequest)?;
    let file_type = match params.file_type.as_deref() {
        Some(raw) => raw.parse::<FileType>().map_err(AppError::BadRequest)?,
        None => FileType::Csv,
    };

    let body = schema::template(upload_type, file_type)
        .map_err(|e| AppError::Internal(format!("template rendering failed: {}", e)))?;

    let (content_type, extension) = match file_type {
        FileType::Csv => ("text/csv; charset=utf-8", "csv"),
        FileType::Tsv => ("text/tab-separated-values; charset=utf-8", "tsv"),
    };
    let disposition = format!(
        "attachment; filename=\"{}_template.{}\"",
        upload_type.as_str().to_lowercase(),
        extension
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        body,
    )
        .into_response())
}
