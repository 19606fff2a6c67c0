//! List job logs, newest first

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::features::shared::{Paginated, PaginationMetadata, PaginationParams};
use crate::ingest::store::JobLogStore;
use crate::ingest::{JobLogFilter, JobLogSummary, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobLogsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "per_page")]
    pub limit: Option<i64>,
    /// `DATA_UPLOAD` or `DATA_FETCHING`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListJobLogsError {
    #[error("Invalid {field} filter: {reason}")]
    InvalidFilter { field: &'static str, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<Paginated<JobLogSummary>, ListJobLogsError>> for ListJobLogsQuery {}

impl ListJobLogsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.limit)
    }

    pub fn filter(&self) -> Result<JobLogFilter, ListJobLogsError> {
        Ok(JobLogFilter {
            job_type: parse_filter("jobType", self.job_type.as_deref())?,
            log_type: parse_filter("logType", self.log_type.as_deref())?,
            status: parse_filter("status", self.status.as_deref())?,
        })
    }
}

fn parse_filter<T>(field: &'static str, raw: Option<&str>) -> Result<Option<T>, ListJobLogsError>
where
    T: FromStr<Err = String>,
{
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|reason| ListJobLogsError::InvalidFilter { field, reason }),
    }
}

#[tracing::instrument(skip(logs))]
pub async fn handle(
    logs: Arc<dyn JobLogStore>,
    query: ListJobLogsQuery,
) -> Result<Paginated<JobLogSummary>, ListJobLogsError> {
    let filter = query.filter()?;
    let params = query.pagination();

    let (items, total) = logs.list(&filter, params.per_page(), params.offset()).await?;

    Ok(Paginated::new(items, PaginationMetadata::from_params(&params, total)))
}
