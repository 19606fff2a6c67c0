//! Per-job execution: open the job's record source and reconcile it

use std::sync::Arc;
use tracing::{info, instrument};

use super::error::EngineAbort;
use super::parser::{self, RecordSource};
use super::reconcile::ReconciliationEngine;
use super::sources::{catalog_source, fetch_catalog, AdapterRegistry, FetchPolicy};
use super::store::{JobLogStore, Stores};
use super::types::{JobCounters, JobDescriptor, JobPayload, JobType};

pub struct JobRunner {
    engine: ReconciliationEngine,
    logs: Arc<dyn JobLogStore>,
    adapters: AdapterRegistry,
    fetch_policy: FetchPolicy,
}

impl JobRunner {
    pub fn new(stores: &Stores, adapters: AdapterRegistry, fetch_policy: FetchPolicy) -> Self {
        Self {
            engine: ReconciliationEngine::new(stores.entities.clone(), stores.logs.clone()),
            logs: stores.logs.clone(),
            adapters,
            fetch_policy,
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Run one claimed job whose log is already IN_PROGRESS
    #[instrument(skip(self, descriptor), fields(job_id = %descriptor.id, job_type = %descriptor.job_type))]
    pub async fn run(&self, descriptor: &JobDescriptor) -> Result<JobCounters, EngineAbort> {
        let mut source = self.open_source(descriptor).await?;
        self.logs.set_total(descriptor.id, source.total()).await?;

        info!(total = source.total(), "Reconciling records");
        self.engine.run(descriptor.id, &mut source).await
    }

    async fn open_source(&self, descriptor: &JobDescriptor) -> Result<RecordSource, EngineAbort> {
        match (descriptor.job_type, &descriptor.payload) {
            (JobType::Upload(upload_type), JobPayload::File { path, file_type, .. }) => {
                let total = parser::count_records(path.clone(), *file_type).await?;
                Ok(parser::open_upload(path.clone(), *file_type, upload_type, total))
            },
            (JobType::Fetch(fetch_type), JobPayload::Fetch) => {
                let adapter = self.adapters.get(fetch_type).ok_or_else(|| {
                    EngineAbort::Structural(format!("no source adapter configured for {}", fetch_type))
                })?;
                let items = fetch_catalog(adapter.as_ref(), &self.fetch_policy, fetch_type).await?;
                Ok(catalog_source(fetch_type, items))
            },
            (job_type, _) => Err(EngineAbort::Structural(format!(
                "payload does not match job type {}",
                job_type
            ))),
        }
    }
}
