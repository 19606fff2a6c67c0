//! Reconciliation engine
//!
//! Drives a [`RecordSource`] to exhaustion, turning every item into exactly
//! one [`RecordOutcome`] recorded on the job log. Record-level problems are
//! captured locally; only an [`EngineAbort`] stops the job.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{EngineAbort, RecordError};
use super::parser::{RecordSource, SourceItem};
use super::records::{EntityKind, TypedRecord};
use super::store::{Applied, EntityStore, EntityWrite, JobLogStore, StoreError};
use super::types::{JobCounters, RecordAction, RecordOutcome};

/// Create when absent, update when the content differs, otherwise leave as is
pub fn decide(existing_hash: Option<&str>, incoming_hash: &str) -> Applied {
    match existing_hash {
        None => Applied::Created,
        Some(existing) if existing == incoming_hash => Applied::Unchanged,
        Some(_) => Applied::Updated,
    }
}

/// SHA-256 over the canonical JSON encoding of an attribute document
pub fn content_hash(attributes: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(attributes, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compact JSON with object keys sorted at every level
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        },
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub struct ReconciliationEngine {
    entities: Arc<dyn EntityStore>,
    logs: Arc<dyn JobLogStore>,
}

impl ReconciliationEngine {
    pub fn new(entities: Arc<dyn EntityStore>, logs: Arc<dyn JobLogStore>) -> Self {
        Self { entities, logs }
    }

    /// Process every item of `source` in order, recording each outcome on the job log
    pub async fn run(&self, job_id: Uuid, source: &mut RecordSource) -> Result<JobCounters, EngineAbort> {
        let mut counters = JobCounters {
            total_records: source.total(),
            ..Default::default()
        };

        while let Some(item) = source.next().await {
            let outcome = match item {
                SourceItem::Record(record) => self.reconcile(job_id, &record).await?,
                SourceItem::Rejected { identifier, error } => {
                    RecordOutcome::failed(identifier, error.to_string())
                },
                SourceItem::Abort(abort) => return Err(abort),
            };

            if outcome.action == RecordAction::Failed {
                debug!(
                    job_id = %job_id,
                    identifier = %outcome.identifier,
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    "Record failed"
                );
            }

            self.logs.record_outcome(job_id, &outcome).await?;
            counters.record(outcome.action);
        }

        if counters.processed_records < counters.total_records {
            return Err(EngineAbort::Structural(format!(
                "source ended after {} of {} records",
                counters.processed_records, counters.total_records
            )));
        }

        Ok(counters)
    }

    /// Reconcile a single record against persisted state
    pub async fn reconcile(&self, job_id: Uuid, record: &TypedRecord) -> Result<RecordOutcome, EngineAbort> {
        let identifier = record.natural_key();

        if let Err(e) = record.validate() {
            return Ok(RecordOutcome::failed(identifier, e.to_string()));
        }

        let attributes = match record.attributes() {
            Ok(attributes) => attributes,
            Err(e) => {
                return Ok(RecordOutcome::failed(
                    identifier,
                    format!("record could not be encoded: {}", e),
                ))
            },
        };
        let hash = content_hash(&attributes);
        let references: Vec<(EntityKind, String)> = record
            .references()
            .into_iter()
            .map(|r| (r.kind, r.key))
            .collect();

        let write = EntityWrite {
            kind: record.entity_kind(),
            natural_key: &identifier,
            attributes: &attributes,
            content_hash: &hash,
            references: &references,
            job_id,
        };

        match self.entities.apply(write).await {
            Ok(applied) => {
                let action = match applied {
                    Applied::Created => RecordAction::Created,
                    Applied::Updated => RecordAction::Updated,
                    Applied::Unchanged => RecordAction::Skipped,
                };
                Ok(RecordOutcome::applied(identifier, action))
            },
            Err(e) if e.is_record_level() => {
                let reason = record_error(record, e).to_string();
                Ok(RecordOutcome::failed(identifier, reason))
            },
            Err(e) => {
                warn!(job_id = %job_id, identifier = %identifier, error = %e, "Entity store failure");
                Err(EngineAbort::Store(e))
            },
        }
    }
}

fn record_error(record: &TypedRecord, err: StoreError) -> RecordError {
    match err {
        StoreError::MissingReference { kind, key } => {
            let field = record
                .references()
                .into_iter()
                .find(|r| r.kind == kind && r.key == key)
                .map(|r| r.field)
                .unwrap_or("reference");
            RecordError::MissingReference {
                field,
                kind: kind.as_str(),
                key,
            }
        },
        other => RecordError::Conflict(other.to_string()),
    }
}
