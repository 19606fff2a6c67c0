//! Shared setup for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fundsync_server::ingest::records::EntityKind;
use fundsync_server::ingest::sources::FetchPolicy;
use fundsync_server::ingest::store::{
    Applied, EntityStore, EntityWrite, MemoryEntityStore, StoreError, StoredEntity,
};
use fundsync_server::ingest::{
    AdapterRegistry, IngestConfig, IngestRuntime, JobGateway, JobLog, JobStatus, Stores,
    SubmissionError, UploadSubmission,
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const JOB_TIMEOUT: Duration = Duration::from_secs(10);

pub fn ingest_config(spool: &TempDir) -> IngestConfig {
    IngestConfig {
        worker_pool_size: 4,
        poll_interval: POLL_INTERVAL,
        max_upload_bytes: 1024 * 1024,
        spool_dir: spool.path().to_path_buf(),
        fetch: FetchPolicy {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff: Duration::from_millis(10),
            page_size: 100,
            max_pages: 10,
        },
        ..IngestConfig::default()
    }
}

/// A started runtime over in-memory stores
pub struct TestRuntime {
    pub gateway: JobGateway,
    pub stores: Stores,
    pub shutdown: CancellationToken,
    pub scheduler: JoinHandle<()>,
    pub spool: TempDir,
}

impl TestRuntime {
    pub async fn start(stores: Stores, adapters: AdapterRegistry) -> Self {
        Self::start_in(TempDir::new().unwrap(), stores, adapters).await
    }

    /// Start over an existing spool directory, as a restarted process would
    pub async fn start_in(spool: TempDir, stores: Stores, adapters: AdapterRegistry) -> Self {
        let runtime = IngestRuntime::new(&ingest_config(&spool), stores.clone(), adapters);
        let gateway = runtime.gateway();
        let shutdown = CancellationToken::new();
        let scheduler = runtime.start(shutdown.clone()).await.unwrap();

        Self {
            gateway,
            stores,
            shutdown,
            scheduler,
            spool,
        }
    }

    pub async fn memory() -> Self {
        Self::start(Stores::memory(), AdapterRegistry::new()).await
    }

    pub async fn upload(&self, upload_type: &str, file_name: &str, contents: &str) -> Result<Uuid, SubmissionError> {
        submit_csv(&self.gateway, upload_type, file_name, contents).await
    }

    pub async fn wait_for_final(&self, id: Uuid) -> JobLog {
        wait_for(&self.stores, id, |s| s.is_final()).await
    }

    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus) -> JobLog {
        wait_for(&self.stores, id, |s| s == status).await
    }

    pub async fn status(&self, id: Uuid) -> JobStatus {
        self.stores.logs.get(id).await.unwrap().unwrap().status()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(JOB_TIMEOUT, self.scheduler)
            .await
            .unwrap()
            .unwrap();
    }
}

/// Spool `contents` and submit it as a QUEUE-mode CSV upload
pub async fn submit_csv(
    gateway: &JobGateway,
    upload_type: &str,
    file_name: &str,
    contents: &str,
) -> Result<Uuid, SubmissionError> {
    let chunks = stream::iter(vec![Ok::<_, SubmissionError>(contents.as_bytes().to_vec())]);
    let file = gateway.spool(chunks).await?;

    gateway
        .submit_upload(UploadSubmission {
            upload_type: Some(upload_type.to_string()),
            source: Some("integration-test".to_string()),
            process_mode: Some("QUEUE".to_string()),
            file_type: Some("CSV".to_string()),
            file_name: Some(file_name.to_string()),
            file: Some(file),
            submitted_by: Some("tester".to_string()),
        })
        .await
}

pub async fn wait_for<F>(stores: &Stores, id: Uuid, done: F) -> JobLog
where
    F: Fn(JobStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + JOB_TIMEOUT;
    loop {
        let log = stores.logs.get(id).await.unwrap().expect("job log exists");
        if done(log.status()) {
            return log;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {}",
            id,
            log.status()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Entity store where each write consumes one gate permit
pub struct GatedEntityStore {
    inner: MemoryEntityStore,
    gate: Arc<Semaphore>,
}

impl GatedEntityStore {
    pub fn closed() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(Self {
            inner: MemoryEntityStore::default(),
            gate: gate.clone(),
        });
        (store, gate)
    }
}

#[async_trait]
impl EntityStore for GatedEntityStore {
    async fn apply(&self, write: EntityWrite<'_>) -> Result<Applied, StoreError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| StoreError::Corrupt("gate closed".to_string()))?
            .forget();
        self.inner.apply(write).await
    }

    async fn get(&self, kind: EntityKind, natural_key: &str) -> Result<Option<StoredEntity>, StoreError> {
        self.inner.get(kind, natural_key).await
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        self.inner.count(kind).await
    }
}

/// Entity store whose writes panic
#[derive(Default)]
pub struct PanickingEntityStore;

#[async_trait]
impl EntityStore for PanickingEntityStore {
    async fn apply(&self, write: EntityWrite<'_>) -> Result<Applied, StoreError> {
        panic!("entity store exploded on {}", write.natural_key);
    }

    async fn get(&self, _kind: EntityKind, _natural_key: &str) -> Result<Option<StoredEntity>, StoreError> {
        Ok(None)
    }

    async fn count(&self, _kind: EntityKind) -> Result<i64, StoreError> {
        Ok(0)
    }
}

pub fn market_list(rows: &[(&str, &str)]) -> String {
    let mut csv = String::from("isin,name\n");
    for (isin, name) in rows {
        csv.push_str(&format!("{},{}\n", isin, name));
    }
    csv
}
