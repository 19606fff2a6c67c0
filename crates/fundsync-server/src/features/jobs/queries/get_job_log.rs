//! Get one job log with all of its error entries

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::ingest::store::JobLogStore;
use crate::ingest::{JobLog, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobLogQuery {
    pub log_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobLogError {
    #[error("'{0}' is not a valid job log id")]
    InvalidId(String),

    #[error("Job log {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<JobLog, GetJobLogError>> for GetJobLogQuery {}

#[tracing::instrument(skip(logs))]
pub async fn handle(logs: Arc<dyn JobLogStore>, query: GetJobLogQuery) -> Result<JobLog, GetJobLogError> {
    let id = Uuid::parse_str(query.log_id.trim()).map_err(|_| GetJobLogError::InvalidId(query.log_id.clone()))?;

    logs.get(id).await?.ok_or(GetJobLogError::NotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemoryJobLogStore;

    #[tokio::test]
    async fn test_malformed_and_unknown_ids() {
        let logs: Arc<dyn JobLogStore> = Arc::new(MemoryJobLogStore::default());

        let err = handle(
            logs.clone(),
            GetJobLogQuery {
                log_id: "not-a-uuid".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GetJobLogError::InvalidId(_)));

        let missing = Uuid::new_v4();
        let err = handle(
            logs,
            GetJobLogQuery {
                log_id: missing.to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GetJobLogError::NotFound(id) if id == missing));
    }
}
