//! Job queue dispatch
//!
//! The scheduler walks queued descriptors in submission order and hands them
//! to a bounded pool of workers. A per-type lease keeps at most one job of
//! each job type running; queued jobs of a leased type stay queued, in order,
//! until the lease is released.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::IngestConfig;
use super::error::EngineAbort;
use super::gateway::SPOOL_FILE_EXTENSION;
use super::store::{StoreError, Stores};
use super::types::{ErrorDetail, JobCounters, JobDescriptor, JobPayload, JobStatus, JobType};
use super::worker::JobRunner;

/// Table of job types that currently have a running job
#[derive(Debug, Clone, Default)]
pub struct TypeLeases {
    held: Arc<Mutex<HashSet<JobType>>>,
}

impl TypeLeases {
    /// Take the lease for `job_type`, or `None` when another job holds it
    pub fn try_acquire(&self, job_type: JobType) -> Option<TypeLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(job_type).then(|| TypeLease {
            job_type,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, job_type: JobType) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_type)
    }
}

/// Released on drop
#[derive(Debug)]
pub struct TypeLease {
    job_type: JobType,
    held: Arc<Mutex<HashSet<JobType>>>,
}

impl TypeLease {
    pub fn job_type(&self) -> JobType {
        self.job_type
    }
}

impl Drop for TypeLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_type);
    }
}

/// Wakes the dispatch loop
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn notify(&self) {
        self.notify.notify_one();
    }
}

pub struct Scheduler {
    stores: Stores,
    runner: Arc<JobRunner>,
    leases: TypeLeases,
    permits: Arc<Semaphore>,
    pool_size: usize,
    notify: Arc<Notify>,
    poll_interval: Duration,
    spool_dir: PathBuf,
}

impl Scheduler {
    pub fn new(stores: Stores, runner: Arc<JobRunner>, config: &IngestConfig) -> Self {
        Self {
            stores,
            runner,
            leases: TypeLeases::default(),
            permits: Arc::new(Semaphore::new(config.worker_pool_size)),
            pool_size: config.worker_pool_size,
            notify: Arc::new(Notify::new()),
            poll_interval: config.poll_interval,
            spool_dir: config.spool_dir.clone(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            notify: self.notify.clone(),
        }
    }

    pub fn leases(&self) -> &TypeLeases {
        &self.leases
    }

    /// Fail logs orphaned by a previous process
    ///
    /// IN_PROGRESS logs were interrupted mid-job. PENDING logs whose descriptor
    /// is no longer queued can never run. Spooled uploads that no queued
    /// descriptor refers to are deleted afterwards.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let pending = self.stores.queue.pending().await?;
        let queued: HashSet<Uuid> = pending.iter().map(|d| d.id).collect();
        let referenced: HashSet<OsString> = pending
            .iter()
            .filter_map(|d| match &d.payload {
                JobPayload::File { path, .. } => path.file_name().map(|name| name.to_os_string()),
                JobPayload::Fetch => None,
            })
            .collect();

        let mut recovered = 0;
        for (id, status) in self.stores.logs.unfinished().await? {
            let reason = match status {
                JobStatus::InProgress => {
                    "Interrupted: the service stopped while the job was running; resubmit to retry"
                },
                JobStatus::Pending if !queued.contains(&id) => {
                    "Interrupted: the queued job was lost before it could start; resubmit to retry"
                },
                _ => continue,
            };

            warn!(job_id = %id, status = %status, "Failing orphaned job log");
            self.stores
                .logs
                .finalize(id, JobStatus::Failed, Some(ErrorDetail::new("job", reason)))
                .await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Recovered orphaned job logs");
        }

        let swept = self.sweep_spool(&referenced).await;
        if swept > 0 {
            info!(swept, spool_dir = %self.spool_dir.display(), "Removed orphaned spooled uploads");
        }
        Ok(recovered)
    }

    /// Delete spooled uploads whose file name is not in `referenced`
    async fn sweep_spool(&self, referenced: &HashSet<OsString>) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.spool_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(spool_dir = %self.spool_dir.display(), error = %e, "Failed to scan spool directory");
                return 0;
            },
        };

        let mut swept = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(spool_dir = %self.spool_dir.display(), error = %e, "Failed to scan spool directory");
                    break;
                },
            };

            let path = entry.path();
            let is_upload = path.extension().is_some_and(|ext| ext == SPOOL_FILE_EXTENSION);
            if !is_upload || referenced.contains(&entry.file_name()) {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed orphaned spooled upload");
                    swept += 1;
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned spooled upload"),
            }
        }
        swept
    }

    /// Run the dispatch loop until `shutdown` fires, then wait for running jobs
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        info!(
            workers = self.pool_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = self.notify.notified() => {},
                _ = interval.tick() => {},
            }

            if let Err(e) = self.dispatch_pending().await {
                error!(error = %e, "Dispatch pass failed");
            }
        }

        info!("Scheduler stopped dispatching, waiting for running jobs");
        let pool = u32::try_from(self.pool_size).unwrap_or(u32::MAX);
        if self.permits.acquire_many(pool).await.is_ok() {
            info!("All running jobs finished");
        }
    }

    /// One pass over the queue; returns the number of jobs started
    pub async fn dispatch_pending(&self) -> Result<usize, StoreError> {
        let mut dispatched = 0;

        for queued in self.stores.queue.pending().await? {
            if self.leases.is_held(queued.job_type) {
                continue;
            }
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!("Worker pool saturated");
                break;
            };
            let Some(lease) = self.leases.try_acquire(queued.job_type) else {
                continue;
            };
            let Some(descriptor) = self.stores.queue.claim(queued.id).await? else {
                continue;
            };

            self.spawn_job(descriptor, lease, permit);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn spawn_job(&self, descriptor: JobDescriptor, lease: TypeLease, permit: OwnedSemaphorePermit) {
        let stores = self.stores.clone();
        let runner = self.runner.clone();
        let notify = self.notify.clone();

        info!(job_id = %descriptor.id, job_type = %descriptor.job_type, "Dispatching job");

        tokio::spawn(async move {
            let outcome = match stores.logs.mark_in_progress(descriptor.id).await {
                Ok(()) => run_isolated(runner, descriptor.clone()).await,
                Err(e) => Err(EngineAbort::Store(e)),
            };

            finalize(&stores, &descriptor, outcome).await;
            remove_spooled_file(&descriptor).await;

            drop(lease);
            drop(permit);
            notify.notify_one();
        });
    }
}

/// Run a job on its own task so a panic becomes an abort instead of a lost job
async fn run_isolated(runner: Arc<JobRunner>, descriptor: JobDescriptor) -> Result<JobCounters, EngineAbort> {
    match tokio::spawn(async move { runner.run(&descriptor).await }).await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EngineAbort::Panicked(message))
        },
        Err(join_err) => Err(EngineAbort::Interrupted(join_err.to_string())),
    }
}

async fn finalize(stores: &Stores, descriptor: &JobDescriptor, outcome: Result<JobCounters, EngineAbort>) {
    let (status, error) = match outcome {
        Ok(counters) => {
            info!(
                job_id = %descriptor.id,
                job_type = %descriptor.job_type,
                total = counters.total_records,
                added = counters.added_records,
                updated = counters.updated_records,
                skipped = counters.skipped_records,
                failed = counters.failed_records,
                "Job completed"
            );
            (JobStatus::Completed, None)
        },
        Err(abort) => {
            error!(
                job_id = %descriptor.id,
                job_type = %descriptor.job_type,
                error = %abort,
                "Job failed"
            );
            (
                JobStatus::Failed,
                Some(ErrorDetail::new(descriptor.job_type.as_str(), abort.to_string())),
            )
        },
    };

    if let Err(e) = stores.logs.finalize(descriptor.id, status, error).await {
        error!(job_id = %descriptor.id, error = %e, "Failed to finalize job log");
    }
}

async fn remove_spooled_file(descriptor: &JobDescriptor) {
    if let JobPayload::File { path, .. } = &descriptor.payload {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(job_id = %descriptor.id, path = %path.display(), "Removed spooled upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(job_id = %descriptor.id, path = %path.display(), error = %e, "Failed to remove spooled upload"),
        }
    }
}
