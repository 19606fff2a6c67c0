//! Persistence seams of the ingestion pipeline
//!
//! Three stores back the pipeline:
//!
//! - [`DescriptorQueue`]: durable FIFO of submitted jobs
//! - [`JobLogStore`]: job log lifecycle, counters and error entries
//! - [`EntityStore`]: reconciled entities keyed by `(kind, natural key)`
//!
//! Each has a PostgreSQL implementation and an in-memory one.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::records::EntityKind;
use super::types::{
    ErrorDetail, JobDescriptor, JobLog, JobLogFilter, JobLogSummary, JobStatus, RecordOutcome,
};

pub use memory::{MemoryDescriptorQueue, MemoryEntityStore, MemoryJobLogStore};
pub use postgres::{PgDescriptorQueue, PgEntityStore, PgJobLogStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job log not found: {0}")]
    NotFound(Uuid),

    #[error("Job log {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: Uuid,
        status: JobStatus,
        expected: &'static str,
    },

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("{kind} '{key}' does not exist")]
    MissingReference { kind: EntityKind, key: String },
}

impl StoreError {
    /// Errors that concern a single record rather than the store itself
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            StoreError::Constraint(_) | StoreError::MissingReference { .. }
        )
    }

    /// Classify database errors raised by integrity constraints
    pub fn from_database(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // unique_violation, foreign_key_violation, check_violation, not_null_violation
            if let Some("23505" | "23503" | "23514" | "23502") = db_err.code().as_deref() {
                return StoreError::Constraint(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// Durable FIFO of submitted job descriptors
#[async_trait]
pub trait DescriptorQueue: Send + Sync {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), StoreError>;

    /// Queued descriptors in submission order
    async fn pending(&self) -> Result<Vec<JobDescriptor>, StoreError>;

    /// Remove a descriptor; `None` when it was already claimed
    async fn claim(&self, id: Uuid) -> Result<Option<JobDescriptor>, StoreError>;
}

/// Job log lifecycle and counters
///
/// Counter updates are monotonic: `record_outcome` bumps `processedRecords`
/// and exactly one outcome bucket, and appends the error entry of a failed
/// record in the same atomic step. Only PENDING or IN_PROGRESS logs accept
/// mutations; a finalized log is immutable.
#[async_trait]
pub trait JobLogStore: Send + Sync {
    /// Persist the PENDING log of a just-accepted descriptor
    async fn create(&self, log: &JobLog) -> Result<(), StoreError>;

    /// PENDING -> IN_PROGRESS, stamping `startedAt`
    async fn mark_in_progress(&self, id: Uuid) -> Result<(), StoreError>;

    async fn set_total(&self, id: Uuid, total: i64) -> Result<(), StoreError>;

    async fn record_outcome(&self, id: Uuid, outcome: &RecordOutcome) -> Result<(), StoreError>;

    /// Move to COMPLETED or FAILED, stamping `completedAt`; optionally append one error entry
    async fn finalize(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<ErrorDetail>,
    ) -> Result<(), StoreError>;

    /// Remove a PENDING log whose submission was rolled back before it was queued
    async fn discard(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobLog>, StoreError>;

    /// Newest first
    async fn list(
        &self,
        filter: &JobLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<JobLogSummary>, i64), StoreError>;

    /// Ids and statuses of logs that are not final yet
    async fn unfinished(&self) -> Result<Vec<(Uuid, JobStatus)>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Result of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// One record's write request
#[derive(Debug, Clone)]
pub struct EntityWrite<'a> {
    pub kind: EntityKind,
    pub natural_key: &'a str,
    pub attributes: &'a serde_json::Value,
    pub content_hash: &'a str,
    /// `(kind, key)` pairs that must exist for the write to be accepted
    pub references: &'a [(EntityKind, String)],
    pub job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub kind: EntityKind,
    pub natural_key: String,
    pub attributes: serde_json::Value,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_job_id: Uuid,
}

/// Reconciled entity storage
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Look up, decide and write one record inside a single transactional scope
    async fn apply(&self, write: EntityWrite<'_>) -> Result<Applied, StoreError>;

    async fn get(&self, kind: EntityKind, natural_key: &str) -> Result<Option<StoredEntity>, StoreError>;

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError>;
}

/// The three stores, shared across gateway, scheduler and queries
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn DescriptorQueue>,
    pub logs: Arc<dyn JobLogStore>,
    pub entities: Arc<dyn EntityStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryDescriptorQueue::default()),
            logs: Arc::new(MemoryJobLogStore::default()),
            entities: Arc::new(MemoryEntityStore::default()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            queue: Arc::new(PgDescriptorQueue::new(pool.clone())),
            logs: Arc::new(PgJobLogStore::new(pool.clone())),
            entities: Arc::new(PgEntityStore::new(pool)),
        }
    }
}
