//! In-memory stores
//!
//! Used by the `memory` storage backend and throughout the test-suite. Every
//! operation runs under one async lock, which gives the same atomicity the
//! PostgreSQL implementations get from transactions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    Applied, DescriptorQueue, EntityStore, EntityWrite, JobLogStore, StoreError, StoredEntity,
};
use crate::ingest::reconcile::decide;
use crate::ingest::records::EntityKind;
use crate::ingest::types::{
    ErrorDetail, JobDescriptor, JobLog, JobLogFilter, JobLogSummary, JobStatus, RecordOutcome,
};

#[derive(Default)]
pub struct MemoryDescriptorQueue {
    queue: Mutex<VecDeque<JobDescriptor>>,
}

#[async_trait]
impl DescriptorQueue for MemoryDescriptorQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), StoreError> {
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|d| d.id == descriptor.id) {
            return Err(StoreError::Constraint(format!(
                "descriptor {} is already queued",
                descriptor.id
            )));
        }
        queue.push_back(descriptor.clone());
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<JobDescriptor>, StoreError> {
        Ok(self.queue.lock().await.iter().cloned().collect())
    }

    async fn claim(&self, id: Uuid) -> Result<Option<JobDescriptor>, StoreError> {
        let mut queue = self.queue.lock().await;
        Ok(queue
            .iter()
            .position(|d| d.id == id)
            .and_then(|index| queue.remove(index)))
    }
}

#[derive(Default)]
struct LogState {
    logs: HashMap<Uuid, JobLog>,
    /// Creation order, oldest first
    order: Vec<Uuid>,
}

impl LogState {
    fn log_mut(&mut self, id: Uuid) -> Result<&mut JobLog, StoreError> {
        self.logs.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

fn expect_status(log: &JobLog, wanted: JobStatus) -> Result<(), StoreError> {
    if log.status() == wanted {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: log.id(),
            status: log.status(),
            expected: wanted.as_str(),
        })
    }
}

#[derive(Default)]
pub struct MemoryJobLogStore {
    state: RwLock<LogState>,
}

#[async_trait]
impl JobLogStore for MemoryJobLogStore {
    async fn create(&self, log: &JobLog) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.logs.contains_key(&log.id()) {
            return Err(StoreError::Constraint(format!("job log {} already exists", log.id())));
        }
        state.order.push(log.id());
        state.logs.insert(log.id(), log.clone());
        Ok(())
    }

    async fn discard(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        expect_status(state.log_mut(id)?, JobStatus::Pending)?;
        state.logs.remove(&id);
        state.order.retain(|existing| *existing != id);
        Ok(())
    }

    async fn mark_in_progress(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let log = state.log_mut(id)?;
        expect_status(log, JobStatus::Pending)?;
        log.summary.status = JobStatus::InProgress;
        log.summary.started_at = Some(Utc::now());
        Ok(())
    }

    async fn set_total(&self, id: Uuid, total: i64) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let log = state.log_mut(id)?;
        expect_status(log, JobStatus::InProgress)?;
        log.summary.counters.total_records = total;
        Ok(())
    }

    async fn record_outcome(&self, id: Uuid, outcome: &RecordOutcome) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let log = state.log_mut(id)?;
        expect_status(log, JobStatus::InProgress)?;
        log.summary.counters.record(outcome.action);
        if let Some(detail) = outcome.error_detail() {
            log.error_details.push(detail);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<ErrorDetail>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let log = state.log_mut(id)?;
        if log.status().is_final() {
            return Err(StoreError::InvalidTransition {
                id,
                status: log.status(),
                expected: "PENDING or IN_PROGRESS",
            });
        }
        log.summary.status = status;
        log.summary.completed_at = Some(Utc::now());
        log.error_details.extend(error);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobLog>, StoreError> {
        Ok(self.state.read().await.logs.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &JobLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<JobLogSummary>, i64), StoreError> {
        let state = self.state.read().await;
        let matching: Vec<&JobLogSummary> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.logs.get(id))
            .map(|log| &log.summary)
            .filter(|summary| filter.matches(summary))
            .collect();

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok((items, total))
    }

    async fn unfinished(&self) -> Result<Vec<(Uuid, JobStatus)>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.logs.get(id))
            .filter(|log| !log.status().is_final())
            .map(|log| (log.id(), log.status()))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEntityStore {
    entities: Mutex<HashMap<(EntityKind, String), StoredEntity>>,
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn apply(&self, write: EntityWrite<'_>) -> Result<Applied, StoreError> {
        let mut entities = self.entities.lock().await;

        for (kind, key) in write.references {
            if !entities.contains_key(&(*kind, key.clone())) {
                return Err(StoreError::MissingReference {
                    kind: *kind,
                    key: key.clone(),
                });
            }
        }

        let slot = (write.kind, write.natural_key.to_string());
        let existing = entities.get(&slot).map(|e| e.content_hash.as_str());
        let applied = decide(existing, write.content_hash);
        let now = Utc::now();

        match applied {
            Applied::Created => {
                entities.insert(
                    slot,
                    StoredEntity {
                        kind: write.kind,
                        natural_key: write.natural_key.to_string(),
                        attributes: write.attributes.clone(),
                        content_hash: write.content_hash.to_string(),
                        created_at: now,
                        updated_at: now,
                        last_job_id: write.job_id,
                    },
                );
            },
            Applied::Updated => {
                if let Some(entity) = entities.get_mut(&slot) {
                    entity.attributes = write.attributes.clone();
                    entity.content_hash = write.content_hash.to_string();
                    entity.updated_at = now;
                    entity.last_job_id = write.job_id;
                }
            },
            Applied::Unchanged => {},
        }

        Ok(applied)
    }

    async fn get(&self, kind: EntityKind, natural_key: &str) -> Result<Option<StoredEntity>, StoreError> {
        Ok(self
            .entities
            .lock()
            .await
            .get(&(kind, natural_key.to_string()))
            .cloned())
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        Ok(self
            .entities
            .lock()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{
        JobKind, JobPayload, JobType, RecordAction, UploadType,
    };
    use serde_json::json;

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            id: Uuid::new_v4(),
            kind: JobKind::FileUpload,
            job_type: JobType::Upload(UploadType::MarketList),
            submitted_by: "ops".to_string(),
            submitted_at: Utc::now(),
            payload: JobPayload::Fetch,
        }
    }

    #[tokio::test]
    async fn test_queue_claims_once_in_order() {
        let queue = MemoryDescriptorQueue::default();
        let first = descriptor();
        let second = descriptor();
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);

        assert!(queue.claim(first.id).await.unwrap().is_some());
        assert!(queue.claim(first.id).await.unwrap().is_none());
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_log_lifecycle() {
        let store = MemoryJobLogStore::default();
        let log = JobLog::pending(&descriptor());
        let id = log.id();
        store.create(&log).await.unwrap();

        // counters only move while IN_PROGRESS
        let outcome = RecordOutcome::applied("INE001", RecordAction::Created);
        assert!(store.record_outcome(id, &outcome).await.is_err());

        store.mark_in_progress(id).await.unwrap();
        store.set_total(id, 2).await.unwrap();
        store.record_outcome(id, &outcome).await.unwrap();
        store
            .record_outcome(id, &RecordOutcome::failed("INE002", "name is required"))
            .await
            .unwrap();
        store.finalize(id, JobStatus::Completed, None).await.unwrap();

        let log = store.get(id).await.unwrap().unwrap();
        assert_eq!(log.status(), JobStatus::Completed);
        assert_eq!(log.counters().processed_records, 2);
        assert_eq!(log.counters().added_records, 1);
        assert_eq!(log.counters().failed_records, 1);
        assert_eq!(log.error_details, vec![ErrorDetail::new("INE002", "name is required")]);
        assert!(log.summary.started_at.is_some());
        assert!(log.summary.completed_at.is_some());

        assert!(store.finalize(id, JobStatus::Failed, None).await.is_err());
        assert!(store.record_outcome(id, &outcome).await.is_err());
    }

    #[tokio::test]
    async fn test_discard_only_removes_pending_logs() {
        let logs = MemoryJobLogStore::default();
        let pending = descriptor();
        let running = descriptor();
        logs.create(&JobLog::pending(&pending)).await.unwrap();
        logs.create(&JobLog::pending(&running)).await.unwrap();
        logs.mark_in_progress(running.id).await.unwrap();

        logs.discard(pending.id).await.unwrap();
        assert!(logs.get(pending.id).await.unwrap().is_none());
        assert!(matches!(
            logs.discard(pending.id).await,
            Err(StoreError::NotFound(_))
        ));

        assert!(matches!(
            logs.discard(running.id).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        let (listed, total) = logs.list(&JobLogFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(listed[0].id, running.id);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates_newest_first() {
        let store = MemoryJobLogStore::default();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let log = JobLog::pending(&descriptor());
            ids.push(log.id());
            store.create(&log).await.unwrap();
        }

        let (items, total) = store.list(&JobLogFilter::default(), 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, ids[2]);

        let (items, _) = store.list(&JobLogFilter::default(), 2, 2).await.unwrap();
        assert_eq!(items[0].id, ids[0]);

        let filter = JobLogFilter {
            status: Some(JobStatus::Completed),
            ..Default::default()
        };
        let (items, total) = store.list(&filter, 10, 0).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_entity_apply_decisions() {
        let store = MemoryEntityStore::default();
        let job_id = Uuid::new_v4();
        let attrs = json!({"isin": "INE001", "name": "A"});
        let write = |hash: &'static str| EntityWrite {
            kind: EntityKind::MarketSecurity,
            natural_key: "INE001",
            attributes: &attrs,
            content_hash: hash,
            references: &[],
            job_id,
        };

        assert_eq!(store.apply(write("h1")).await.unwrap(), Applied::Created);
        assert_eq!(store.apply(write("h1")).await.unwrap(), Applied::Unchanged);
        assert_eq!(store.apply(write("h2")).await.unwrap(), Applied::Updated);
        assert_eq!(store.count(EntityKind::MarketSecurity).await.unwrap(), 1);

        let stored = store.get(EntityKind::MarketSecurity, "INE001").await.unwrap().unwrap();
        assert_eq!(stored.content_hash, "h2");
    }

    #[tokio::test]
    async fn test_entity_apply_checks_references() {
        let store = MemoryEntityStore::default();
        let attrs = json!({});
        let references = vec![(EntityKind::MarketSecurity, "INE404".to_string())];
        let err = store
            .apply(EntityWrite {
                kind: EntityKind::Holding,
                natural_key: "INV1|INE404|2024-01-31",
                attributes: &attrs,
                content_hash: "h",
                references: &references,
                job_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();

        assert!(err.is_record_level());
        assert_eq!(store.count(EntityKind::Holding).await.unwrap(), 0);
    }
}
