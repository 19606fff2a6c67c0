//! Job submission gateway
//!
//! Validates a submission synchronously and, once accepted, persists the
//! PENDING job log and the queued descriptor before waking the scheduler.
//! Acceptance never implies that processing succeeded; callers poll the job
//! log for that.

use chrono::Utc;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::SubmissionError;
use super::parser::inspect_upload;
use super::scheduler::SchedulerHandle;
use super::sources::AdapterRegistry;
use super::store::Stores;
use super::types::{FetchType, FileType, JobDescriptor, JobLog, JobPayload, JobType, UploadType};

/// Submitter recorded when none is given
pub const DEFAULT_SUBMITTER: &str = "system";

/// The only accepted process mode
pub const PROCESS_MODE_QUEUE: &str = "QUEUE";

/// Extension of files written to the spool directory
pub const SPOOL_FILE_EXTENSION: &str = "upload";

/// An upload written to the spool directory
#[derive(Debug)]
pub struct SpooledFile {
    path: PathBuf,
    size: u64,
}

impl SpooledFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the spooled bytes of an upload that will not be queued
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove rejected upload");
        }
    }
}

#[derive(Debug)]
pub struct UploadSubmission {
    pub upload_type: Option<String>,
    pub source: Option<String>,
    pub process_mode: Option<String>,
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub file: Option<SpooledFile>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchSubmission {
    pub job_type: Option<String>,
    pub submitted_by: Option<String>,
}

#[derive(Clone)]
pub struct JobGateway {
    stores: Stores,
    scheduler: SchedulerHandle,
    adapters: AdapterRegistry,
    spool_dir: PathBuf,
    max_upload_bytes: u64,
}

impl JobGateway {
    pub fn new(
        stores: Stores,
        scheduler: SchedulerHandle,
        adapters: AdapterRegistry,
        spool_dir: PathBuf,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            stores,
            scheduler,
            adapters,
            spool_dir,
            max_upload_bytes,
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Write a byte stream into the spool directory, chunk by chunk
    ///
    /// Stops and removes the partial file as soon as the size ceiling is exceeded
    /// or the stream yields an error.
    pub async fn spool<S, B>(&self, chunks: S) -> Result<SpooledFile, SubmissionError>
    where
        S: Stream<Item = Result<B, SubmissionError>>,
        B: AsRef<[u8]>,
    {
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(SubmissionError::Spool)?;

        let path = self
            .spool_dir
            .join(format!("{}.{}", Uuid::new_v4(), SPOOL_FILE_EXTENSION));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(SubmissionError::Spool)?;

        let written = copy_limited(chunks, &mut file, self.max_upload_bytes).await;
        drop(file);

        match written {
            Ok(size) => {
                debug!(path = %path.display(), size, "Spooled upload");
                Ok(SpooledFile { path, size })
            },
            Err(e) => {
                SpooledFile { path, size: 0 }.discard().await;
                Err(e)
            },
        }
    }

    /// Accept a file upload job
    #[instrument(skip(self, submission), fields(upload_type = ?submission.upload_type))]
    pub async fn submit_upload(&self, mut submission: UploadSubmission) -> Result<Uuid, SubmissionError> {
        let file = submission.file.take();
        match self.validate_upload(&submission, file.as_ref()).await {
            Ok((upload_type, file_type, origin)) => {
                // validated above, so the file is present
                let Some(file) = file else {
                    return Err(SubmissionError::MissingField("file"));
                };
                let payload = JobPayload::File {
                    path: file.path.clone(),
                    file_type,
                    origin,
                    file_name: submission.file_name.clone(),
                };
                let result = self
                    .accept(JobType::Upload(upload_type), submission.submitted_by, payload)
                    .await;
                if result.is_err() {
                    file.discard().await;
                }
                result
            },
            Err(e) => {
                if let Some(file) = file {
                    file.discard().await;
                }
                debug!(error = %e, "Upload rejected");
                Err(e)
            },
        }
    }

    async fn validate_upload(
        &self,
        submission: &UploadSubmission,
        file: Option<&SpooledFile>,
    ) -> Result<(UploadType, FileType, String), SubmissionError> {
        let upload_type = required(&submission.upload_type, "uploadType")?;
        let upload_type: UploadType = upload_type
            .parse()
            .map_err(|_| SubmissionError::UnknownUploadType(upload_type.to_string()))?;

        let origin = required(&submission.source, "source")?.to_string();

        let process_mode = required(&submission.process_mode, "processMode")?;
        if !process_mode.eq_ignore_ascii_case(PROCESS_MODE_QUEUE) {
            return Err(SubmissionError::UnsupportedProcessMode(process_mode.to_string()));
        }

        let file_type = required(&submission.file_type, "fileType")?;
        let file_type: FileType = file_type
            .parse()
            .map_err(|_| SubmissionError::UnsupportedFileType(file_type.to_string()))?;

        if let Some(file_name) = submission.file_name.as_deref() {
            if !file_type.matches_file_name(file_name) {
                return Err(SubmissionError::FileTypeMismatch {
                    file_name: file_name.to_string(),
                    file_type: file_type.to_string(),
                });
            }
        }

        let file = file.ok_or(SubmissionError::MissingField("file"))?;
        if file.size == 0 {
            return Err(SubmissionError::EmptyFile);
        }
        if file.size > self.max_upload_bytes {
            return Err(SubmissionError::FileTooLarge {
                limit: self.max_upload_bytes,
            });
        }

        inspect_upload(file.path.clone(), file_type, upload_type).await?;

        Ok((upload_type, file_type, origin))
    }

    /// Accept an external catalog fetch job
    #[instrument(skip(self, submission), fields(job_type = ?submission.job_type))]
    pub async fn submit_fetch(&self, submission: FetchSubmission) -> Result<Uuid, SubmissionError> {
        let job_type = required(&submission.job_type, "jobType")?;
        let fetch_type: FetchType = job_type
            .parse()
            .map_err(|_| SubmissionError::UnknownFetchType(job_type.to_string()))?;

        if !self.adapters.is_configured(fetch_type) {
            return Err(SubmissionError::AdapterNotConfigured(fetch_type.to_string()));
        }

        self.accept(JobType::Fetch(fetch_type), submission.submitted_by, JobPayload::Fetch)
            .await
    }

    async fn accept(
        &self,
        job_type: JobType,
        submitted_by: Option<String>,
        payload: JobPayload,
    ) -> Result<Uuid, SubmissionError> {
        let submitted_by = submitted_by
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBMITTER.to_string());

        let descriptor = JobDescriptor {
            id: Uuid::new_v4(),
            kind: job_type.kind(),
            job_type,
            submitted_by,
            submitted_at: Utc::now(),
            payload,
        };

        self.stores.logs.create(&JobLog::pending(&descriptor)).await?;

        if let Err(e) = self.stores.queue.enqueue(&descriptor).await {
            if let Err(discard_err) = self.stores.logs.discard(descriptor.id).await {
                warn!(job_id = %descriptor.id, error = %discard_err, "Failed to remove unqueued job log");
            }
            return Err(e.into());
        }

        info!(
            job_id = %descriptor.id,
            job_type = %descriptor.job_type,
            submitted_by = %descriptor.submitted_by,
            "Job accepted"
        );
        self.scheduler.notify();

        Ok(descriptor.id)
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, SubmissionError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(SubmissionError::MissingField(field))
}

async fn copy_limited<S, B>(chunks: S, file: &mut tokio::fs::File, limit: u64) -> Result<u64, SubmissionError>
where
    S: Stream<Item = Result<B, SubmissionError>>,
    B: AsRef<[u8]>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut size: u64 = 0;

    while let Some(chunk) = chunks.try_next().await? {
        let bytes = chunk.as_ref();
        size += bytes.len() as u64;
        if size > limit {
            return Err(SubmissionError::FileTooLarge { limit });
        }
        file.write_all(bytes).await.map_err(SubmissionError::Spool)?;
    }

    file.flush().await.map_err(SubmissionError::Spool)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::scheduler::Scheduler;
    use crate::ingest::config::IngestConfig;
    use crate::ingest::worker::JobRunner;
    use crate::ingest::sources::FetchPolicy;
    use crate::ingest::store::{DescriptorQueue, StoreError};
    use crate::ingest::types::JobStatus;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Queue whose writes always fail
    struct UnavailableQueue;

    #[async_trait]
    impl DescriptorQueue for UnavailableQueue {
        async fn enqueue(&self, _descriptor: &JobDescriptor) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("queue offline".to_string()))
        }

        async fn pending(&self) -> Result<Vec<JobDescriptor>, StoreError> {
            Ok(Vec::new())
        }

        async fn claim(&self, _id: Uuid) -> Result<Option<JobDescriptor>, StoreError> {
            Ok(None)
        }
    }

    fn gateway(spool_dir: &Path, max_upload_bytes: u64) -> (JobGateway, Stores) {
        let stores = Stores::memory();
        let runner = Arc::new(JobRunner::new(&stores, AdapterRegistry::new(), FetchPolicy::default()));
        let scheduler = Scheduler::new(stores.clone(), runner, &IngestConfig::default());
        let gateway = JobGateway::new(
            stores.clone(),
            scheduler.handle(),
            AdapterRegistry::new(),
            spool_dir.to_path_buf(),
            max_upload_bytes,
        );
        (gateway, stores)
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], SubmissionError>> {
        futures::stream::iter(parts.iter().copied().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    fn submission(file: SpooledFile) -> UploadSubmission {
        UploadSubmission {
            upload_type: Some("MARKET_LIST".to_string()),
            source: Some("BSE".to_string()),
            process_mode: Some("QUEUE".to_string()),
            file_type: Some("CSV".to_string()),
            file_name: Some("securities.csv".to_string()),
            file: Some(file),
            submitted_by: Some("ops@fundsync".to_string()),
        }
    }

    #[tokio::test]
    async fn test_spool_enforces_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), 16);

        let file = gateway.spool(chunks(&["isin,", "name\n"])).await.unwrap();
        assert_eq!(file.size(), 10);
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "isin,name\n");

        let err = gateway.spool(chunks(&["isin,name\n", "INE001,Alpha\n"])).await.unwrap_err();
        assert!(matches!(err, SubmissionError::FileTooLarge { limit: 16 }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_accepted_upload_is_pending_and_queued() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, stores) = gateway(dir.path(), 1024);

        let file = gateway.spool(chunks(&["isin,name\n", "INE001,Alpha\n"])).await.unwrap();
        let job_id = gateway.submit_upload(submission(file)).await.unwrap();

        let log = stores.logs.get(job_id).await.unwrap().unwrap();
        assert_eq!(log.status(), JobStatus::Pending);
        assert_eq!(log.summary.submitted_by, "ops@fundsync");

        let queued = stores.queue.pending().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, job_id);
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, stores) = gateway(dir.path(), 1024);

        let file = gateway.spool(chunks(&["isin,name\n"])).await.unwrap();
        let path = file.path().to_path_buf();
        let err = gateway.submit_upload(submission(file)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::NoDataRows));
        assert!(!path.exists());
        assert!(stores.queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_no_log() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, stores) = gateway(dir.path(), 1024);
        let stores = Stores {
            queue: Arc::new(UnavailableQueue),
            ..stores
        };
        let gateway = JobGateway::new(
            stores.clone(),
            gateway.scheduler.clone(),
            AdapterRegistry::new(),
            dir.path().to_path_buf(),
            1024,
        );

        let file = gateway.spool(chunks(&["isin,name\n", "INE001,Alpha\n"])).await.unwrap();
        let path = file.path().to_path_buf();
        let err = gateway.submit_upload(submission(file)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::Store(_)));
        assert!(!err.is_client_error());
        assert!(!path.exists());
        let (logs, total) = stores.logs.list(&Default::default(), 10, 0).await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_upload_field_validation() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), 1024);

        let mut bad_mode = submission(gateway.spool(chunks(&["isin,name\nINE1,A\n"])).await.unwrap());
        bad_mode.process_mode = Some("IMMEDIATE".to_string());
        assert!(matches!(
            gateway.submit_upload(bad_mode).await,
            Err(SubmissionError::UnsupportedProcessMode(_))
        ));

        let mut bad_type = submission(gateway.spool(chunks(&["isin,name\nINE1,A\n"])).await.unwrap());
        bad_type.upload_type = Some("NAV_HISTORY".to_string());
        assert!(matches!(
            gateway.submit_upload(bad_type).await,
            Err(SubmissionError::UnknownUploadType(_))
        ));

        let mut mismatch = submission(gateway.spool(chunks(&["isin,name\nINE1,A\n"])).await.unwrap());
        mismatch.file_name = Some("securities.xlsx".to_string());
        assert!(matches!(
            gateway.submit_upload(mismatch).await,
            Err(SubmissionError::FileTypeMismatch { .. })
        ));

        let empty = submission(gateway.spool(chunks(&[])).await.unwrap());
        assert!(matches!(
            gateway.submit_upload(empty).await,
            Err(SubmissionError::EmptyFile)
        ));
    }

    #[tokio::test]
    async fn test_fetch_requires_configured_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(dir.path(), 1024);

        let err = gateway
            .submit_fetch(FetchSubmission {
                job_type: Some("FETCH_AMCS".to_string()),
                submitted_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::AdapterNotConfigured(_)));

        let err = gateway
            .submit_fetch(FetchSubmission {
                job_type: Some("FETCH_WEATHER".to_string()),
                submitted_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::UnknownFetchType(_)));
    }
}
