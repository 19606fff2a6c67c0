//! Ingestion and reconciliation pipeline
//!
//! ```text
//! submit ──► JobGateway ──► DescriptorQueue ──► Scheduler ──► JobRunner
//!                │                                              │
//!                └──► JobLogStore (PENDING)       RecordSource ─┤
//!                                                               ▼
//!                                                 ReconciliationEngine ──► EntityStore
//! ```
//!
//! Uploads are spooled to disk and parsed against a strict per-type schema;
//! catalogs are pulled through [`sources::CatalogAdapter`]s. Every record is
//! matched on its natural key and created, updated, skipped or failed, with
//! counters and error entries kept on the job's log.

pub mod config;
pub mod error;
pub mod gateway;
pub mod parser;
pub mod reconcile;
pub mod records;
pub mod scheduler;
pub mod schema;
pub mod sources;
pub mod store;
pub mod types;
pub mod worker;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use config::IngestConfig;
pub use error::{EngineAbort, RecordError, SubmissionError};
pub use gateway::{FetchSubmission, JobGateway, SpooledFile, UploadSubmission};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sources::{AdapterRegistry, CatalogAdapter};
pub use store::{StoreError, Stores};
pub use types::*;

/// Gateway and scheduler wired over one set of stores
pub struct IngestRuntime {
    stores: Stores,
    gateway: JobGateway,
    scheduler: Scheduler,
}

impl IngestRuntime {
    pub fn new(config: &IngestConfig, stores: Stores, adapters: AdapterRegistry) -> Self {
        let runner = Arc::new(worker::JobRunner::new(&stores, adapters.clone(), config.fetch));
        let scheduler = Scheduler::new(stores.clone(), runner, config);
        let gateway = JobGateway::new(
            stores.clone(),
            scheduler.handle(),
            adapters,
            config.spool_dir.clone(),
            config.max_upload_bytes,
        );

        Self {
            stores,
            gateway,
            scheduler,
        }
    }

    /// Runtime with HTTP adapters for every configured catalog endpoint
    pub fn from_config(config: &IngestConfig, stores: Stores) -> anyhow::Result<Self> {
        let adapters = AdapterRegistry::from_endpoints(&config.fetch_endpoints, config.fetch.timeout)?;
        Ok(Self::new(config, stores, adapters))
    }

    pub fn stores(&self) -> Stores {
        self.stores.clone()
    }

    pub fn gateway(&self) -> JobGateway {
        self.gateway.clone()
    }

    /// Fail orphaned logs, then start dispatching
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>, StoreError> {
        self.scheduler.recover().await?;
        Ok(self.scheduler.start(shutdown))
    }
}
