//! PostgreSQL stores
//!
//! Runtime-checked `sqlx` queries against the tables created by the
//! `ingest_pipeline` migration. Multi-statement mutations run in a single
//! transaction so counters and error entries never disagree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{
    Applied, DescriptorQueue, EntityStore, EntityWrite, JobLogStore, StoreError, StoredEntity,
};
use crate::ingest::reconcile::decide;
use crate::ingest::records::EntityKind;
use crate::ingest::types::{
    ErrorDetail, JobCounters, JobDescriptor, JobLog, JobLogFilter, JobLogSummary, JobStatus,
    JobType, LogType, RecordAction, RecordOutcome,
};

// ============================================================================
// Descriptor queue
// ============================================================================

pub struct PgDescriptorQueue {
    pool: PgPool,
}

impl PgDescriptorQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DescriptorQueue for PgDescriptorQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_descriptors (id, job_type, submitted_at, descriptor)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(descriptor.id)
        .bind(descriptor.job_type.as_str())
        .bind(descriptor.submitted_at)
        .bind(Json(descriptor))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_database)?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<JobDescriptor>, StoreError> {
        let rows: Vec<(Json<JobDescriptor>,)> = sqlx::query_as(
            r#"
            SELECT descriptor
            FROM job_descriptors
            ORDER BY submitted_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(Json(descriptor),)| descriptor).collect())
    }

    async fn claim(&self, id: Uuid) -> Result<Option<JobDescriptor>, StoreError> {
        let row: Option<(Json<JobDescriptor>,)> =
            sqlx::query_as("DELETE FROM job_descriptors WHERE id = $1 RETURNING descriptor")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(descriptor),)| descriptor))
    }
}

// ============================================================================
// Job logs
// ============================================================================

const SUMMARY_COLUMNS: &str = "id, job_type, log_type, status, submitted_by, created_at, \
    started_at, completed_at, total_records, processed_records, added_records, \
    updated_records, skipped_records, failed_records";

#[derive(Debug, FromRow)]
struct JobLogRow {
    id: Uuid,
    job_type: String,
    log_type: String,
    status: String,
    submitted_by: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    total_records: i64,
    processed_records: i64,
    added_records: i64,
    updated_records: i64,
    skipped_records: i64,
    failed_records: i64,
}

impl TryFrom<JobLogRow> for JobLogSummary {
    type Error = StoreError;

    fn try_from(row: JobLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            job_type: row.job_type.parse::<JobType>().map_err(StoreError::Corrupt)?,
            log_type: row.log_type.parse::<LogType>().map_err(StoreError::Corrupt)?,
            status: row.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?,
            submitted_by: row.submitted_by,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            counters: JobCounters {
                total_records: row.total_records,
                processed_records: row.processed_records,
                added_records: row.added_records,
                updated_records: row.updated_records,
                skipped_records: row.skipped_records,
                failed_records: row.failed_records,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct ErrorRow {
    identifier: String,
    reason: String,
}

pub struct PgJobLogStore {
    pool: PgPool,
}

impl PgJobLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a guarded update touched no row
    async fn transition_error(&self, id: Uuid, expected: &'static str) -> StoreError {
        let current: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM job_logs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => StoreError::NotFound(id),
            Ok(Some((status,))) => match status.parse::<JobStatus>() {
                Ok(status) => StoreError::InvalidTransition {
                    id,
                    status,
                    expected,
                },
                Err(reason) => StoreError::Corrupt(reason),
            },
            Err(e) => StoreError::Database(e),
        }
    }
}

async fn insert_error(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    detail: &ErrorDetail,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO job_log_errors (job_log_id, identifier, reason) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(&detail.identifier)
        .bind(&detail.reason)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::from_database)?;
    Ok(())
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &JobLogFilter) {
    builder.push(" WHERE 1=1");
    if let Some(job_type) = filter.job_type {
        builder.push(" AND job_type = ").push_bind(job_type.as_str());
    }
    if let Some(log_type) = filter.log_type {
        builder.push(" AND log_type = ").push_bind(log_type.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

#[async_trait]
impl JobLogStore for PgJobLogStore {
    async fn create(&self, log: &JobLog) -> Result<(), StoreError> {
        let summary = &log.summary;
        sqlx::query(
            r#"
            INSERT INTO job_logs (id, job_type, log_type, status, submitted_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(summary.id)
        .bind(summary.job_type.as_str())
        .bind(summary.log_type.as_str())
        .bind(summary.status.as_str())
        .bind(&summary.submitted_by)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_database)?;
        Ok(())
    }

    async fn discard(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM job_logs WHERE id = $1 AND status = 'PENDING'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, "PENDING").await);
        }
        Ok(())
    }

    async fn mark_in_progress(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_logs
            SET status = 'IN_PROGRESS', started_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, "PENDING").await);
        }
        Ok(())
    }

    async fn set_total(&self, id: Uuid, total: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE job_logs SET total_records = $2 WHERE id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(id)
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_database)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, "IN_PROGRESS").await);
        }
        Ok(())
    }

    async fn record_outcome(&self, id: Uuid, outcome: &RecordOutcome) -> Result<(), StoreError> {
        let bump = |action: RecordAction| i64::from(outcome.action == action);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE job_logs
            SET processed_records = processed_records + 1,
                added_records = added_records + $2,
                updated_records = updated_records + $3,
                skipped_records = skipped_records + $4,
                failed_records = failed_records + $5
            WHERE id = $1 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(id)
        .bind(bump(RecordAction::Created))
        .bind(bump(RecordAction::Updated))
        .bind(bump(RecordAction::Skipped))
        .bind(bump(RecordAction::Failed))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(id, "IN_PROGRESS").await);
        }

        if let Some(detail) = outcome.error_detail() {
            insert_error(&mut tx, id, &detail).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<ErrorDetail>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'IN_PROGRESS')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(id, "PENDING or IN_PROGRESS").await);
        }

        if let Some(detail) = error {
            insert_error(&mut tx, id, &detail).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobLog>, StoreError> {
        let row: Option<JobLogRow> =
            sqlx::query_as(&format!("SELECT {} FROM job_logs WHERE id = $1", SUMMARY_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let errors: Vec<ErrorRow> = sqlx::query_as(
            "SELECT identifier, reason FROM job_log_errors WHERE job_log_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(JobLog {
            summary: row.try_into()?,
            error_details: errors
                .into_iter()
                .map(|e| ErrorDetail::new(e.identifier, e.reason))
                .collect(),
        }))
    }

    async fn list(
        &self,
        filter: &JobLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<JobLogSummary>, i64), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job_logs");
        push_filter(&mut count, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM job_logs", SUMMARY_COLUMNS));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        let rows: Vec<JobLogRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(JobLogSummary::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((items, total))
    }

    async fn unfinished(&self) -> Result<Vec<(Uuid, JobStatus)>, StoreError> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, status
            FROM job_logs
            WHERE status IN ('PENDING', 'IN_PROGRESS')
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, status)| {
                status
                    .parse::<JobStatus>()
                    .map(|status| (id, status))
                    .map_err(StoreError::Corrupt)
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Reconciled entities
// ============================================================================

#[derive(Debug, FromRow)]
struct EntityRow {
    natural_key: String,
    attributes: Json<serde_json::Value>,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_job_id: Uuid,
}

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn apply(&self, write: EntityWrite<'_>) -> Result<Applied, StoreError> {
        let mut tx = self.pool.begin().await?;

        for (kind, key) in write.references {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM reconciled_entities WHERE kind = $1 AND natural_key = $2)",
            )
            .bind(kind.as_str())
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                return Err(StoreError::MissingReference {
                    kind: *kind,
                    key: key.clone(),
                });
            }
        }

        let existing: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT content_hash
            FROM reconciled_entities
            WHERE kind = $1 AND natural_key = $2
            FOR UPDATE
            "#,
        )
        .bind(write.kind.as_str())
        .bind(write.natural_key)
        .fetch_optional(&mut *tx)
        .await?;

        let applied = decide(existing.as_ref().map(|(hash,)| hash.as_str()), write.content_hash);

        match applied {
            Applied::Created => {
                sqlx::query(
                    r#"
                    INSERT INTO reconciled_entities
                        (kind, natural_key, attributes, content_hash, created_at, updated_at, last_job_id)
                    VALUES ($1, $2, $3, $4, NOW(), NOW(), $5)
                    "#,
                )
                .bind(write.kind.as_str())
                .bind(write.natural_key)
                .bind(Json(write.attributes))
                .bind(write.content_hash)
                .bind(write.job_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_database)?;
            },
            Applied::Updated => {
                sqlx::query(
                    r#"
                    UPDATE reconciled_entities
                    SET attributes = $3, content_hash = $4, updated_at = NOW(), last_job_id = $5
                    WHERE kind = $1 AND natural_key = $2
                    "#,
                )
                .bind(write.kind.as_str())
                .bind(write.natural_key)
                .bind(Json(write.attributes))
                .bind(write.content_hash)
                .bind(write.job_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_database)?;
            },
            Applied::Unchanged => {},
        }

        tx.commit().await?;
        Ok(applied)
    }

    async fn get(&self, kind: EntityKind, natural_key: &str) -> Result<Option<StoredEntity>, StoreError> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT natural_key, attributes, content_hash, created_at, updated_at, last_job_id
            FROM reconciled_entities
            WHERE kind = $1 AND natural_key = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredEntity {
            kind,
            natural_key: row.natural_key,
            attributes: row.attributes.0,
            content_hash: row.content_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_job_id: row.last_job_id,
        }))
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reconciled_entities WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
