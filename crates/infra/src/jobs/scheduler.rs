//! Polling workers that claim, dispatch and resolve jobs.
//!
//! ## Design
//!
//! - N independent loops, each on its own poll timer
//! - A claim is a conditional PENDING -> PROCESSING update; the store's
//!   compare-and-set is the only mutual exclusion
//! - Resolution is conditioned on the lease generation, so a stalled worker
//!   can never overwrite a job somebody else re-claimed
//! - Expired leases are reclaimed by whichever worker polls next
//! - Shutdown is cooperative through a `CancellationToken`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use promptq_core::WorkerId;
use promptq_jobs::lifecycle;
use promptq_jobs::{Failure, Job, JobStatus, RetryPolicy};
use promptq_llm::Dispatcher;

use super::store::{JobFilter, JobSort, JobStore, StoreError};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name prefix for logging; workers are `<name>-<n>`
    pub name: String,
    /// How often each worker polls
    pub poll_interval: Duration,
    /// Candidates fetched per poll cycle
    pub batch_size: usize,
    /// How long a claim stays valid without resolution
    pub lease_ttl: Duration,
    pub retry_policy: RetryPolicy,
    /// Only claim jobs for this model
    pub model: Option<String>,
    /// Only claim jobs for this operation
    pub operation: Option<String>,
    /// Stop after a cycle that claimed nothing
    pub exit_when_empty: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "llm-worker".to_string(),
            poll_interval: Duration::from_secs(10),
            batch_size: 50,
            lease_ttl: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
            model: None,
            operation: None,
            exit_when_empty: false,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_exit_when_empty(mut self, exit: bool) -> Self {
        self.exit_when_empty = exit;
        self
    }

    fn lease_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    fn candidate_filter(&self, now: DateTime<Utc>) -> JobFilter {
        let mut filter = JobFilter::claimable(now);
        filter.model = self.model.clone();
        filter.operation = self.operation.clone();
        filter
    }
}

/// Pool-wide counters. Observational only.
#[derive(Debug, Default)]
pub struct WorkerStats {
    active: AtomicU64,
    claimed: AtomicU64,
    claims_lost: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    errored: AtomicU64,
    released: AtomicU64,
    reclaimed: AtomicU64,
}

impl WorkerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, started: Instant) -> WorkerStatsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);
        let errored = self.errored.load(Ordering::Relaxed);
        WorkerStatsSnapshot {
            active_workers: self.active.load(Ordering::Relaxed),
            jobs_claimed: self.claimed.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            jobs_processed: succeeded + retried + errored,
            jobs_succeeded: succeeded,
            jobs_retried: retried,
            jobs_errored: errored,
            jobs_released: self.released.load(Ordering::Relaxed),
            leases_reclaimed: self.reclaimed.load(Ordering::Relaxed),
            uptime_secs: started.elapsed().as_secs(),
        }
    }
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatsSnapshot {
    /// Workers whose poll loop is still running
    pub active_workers: u64,
    pub jobs_claimed: u64,
    pub claims_lost: u64,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_errored: u64,
    pub jobs_released: u64,
    pub leases_reclaimed: u64,
    pub uptime_secs: u64,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub claimed: usize,
    pub claims_lost: usize,
    pub released: usize,
}

/// How a claimed job ended up after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Retrying,
    Errored,
    Released,
    /// The lease moved on before the result could be stored.
    LeaseLost,
}

/// One polling worker.
pub struct Worker {
    id: WorkerId,
    config: Arc<WorkerConfig>,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        config: Arc<WorkerConfig>,
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id,
            config,
            store,
            dispatcher,
            stats,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Poll until `cancel` fires (or the queue drains, with
    /// `exit_when_empty`).
    pub async fn run(self, cancel: CancellationToken) {
        info!(worker = %self.id, "worker started");
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.poll_once(Utc::now(), &cancel).await {
                        Ok(report) if self.config.exit_when_empty && report.claimed == 0 => {
                            info!(worker = %self.id, "queue drained");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => error!(worker = %self.id, error = %e, "poll cycle failed"),
                    }
                }
            }
        }

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        info!(worker = %self.id, "worker stopped");
    }

    /// One cycle: reclaim expired leases, then claim and process candidates
    /// in priority order.
    ///
    /// `now` only selects what is expired or eligible. Leases and backoff
    /// windows are stamped with the wall clock at the moment they are taken,
    /// since earlier candidates may keep the cycle busy for longer than a
    /// lease lives.
    pub async fn poll_once(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<CycleReport, StoreError> {
        let mut report = CycleReport {
            reclaimed: self.reclaim_expired(now).await?,
            ..CycleReport::default()
        };

        let candidates = self
            .store
            .query(
                &self.config.candidate_filter(now),
                JobSort::PriorityThenAge,
                Some(self.config.batch_size),
            )
            .await?;

        for candidate in candidates {
            if cancel.is_cancelled() {
                break;
            }
            let Some(job) = self.try_claim(&candidate).await? else {
                report.claims_lost += 1;
                continue;
            };
            report.claimed += 1;
            if self.process(job, cancel).await? == Outcome::Released {
                report.released += 1;
            }
        }

        Ok(report)
    }

    /// Reset every job whose lease ran out by `now`.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired = self
            .store
            .query(&JobFilter::expired_leases(now), JobSort::PriorityThenAge, Some(self.config.batch_size))
            .await?;

        let mut reclaimed = 0;
        for job in expired {
            let (expected, patch) = lifecycle::reclaim(&job, &self.config.retry_policy);
            if self.store.atomic_update_if(job.id, &expected, &patch).await? {
                reclaimed += 1;
                WorkerStats::bump(&self.stats.reclaimed);
                warn!(
                    worker = %self.id,
                    job_id = %job.id,
                    attempts = patch.attempts.unwrap_or(job.attempts),
                    status = %patch.status.unwrap_or(job.status),
                    "reclaimed expired lease"
                );
            }
        }
        Ok(reclaimed)
    }

    /// Attempt the PENDING -> PROCESSING compare-and-set.
    ///
    /// Returns the job as claimed, or `None` if another worker (or a client
    /// cancel) got there first.
    pub async fn try_claim(&self, job: &Job) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let (expected, patch) = lifecycle::claim(&self.id, now, self.config.lease_ttl_chrono());
        if !self.store.atomic_update_if(job.id, &expected, &patch).await? {
            WorkerStats::bump(&self.stats.claims_lost);
            debug!(worker = %self.id, job_id = %job.id, "claim lost, skipping");
            return Ok(None);
        }

        WorkerStats::bump(&self.stats.claimed);
        let mut claimed = job.clone();
        patch.apply(&mut claimed, now);
        Ok(Some(claimed))
    }

    /// Drive a claimed job through its provider and store the outcome.
    async fn process(&self, job: Job, cancel: &CancellationToken) -> Result<Outcome, StoreError> {
        if cancel.is_cancelled() {
            let (expected, patch) = lifecycle::release(&job);
            if self.store.atomic_update_if(job.id, &expected, &patch).await? {
                WorkerStats::bump(&self.stats.released);
                info!(worker = %self.id, job_id = %job.id, "released claim on shutdown");
                return Ok(Outcome::Released);
            }
            return Ok(Outcome::LeaseLost);
        }

        match self.dispatcher.dispatch(&job).await {
            Ok(completion) => {
                let tokens = completion.usage.total_tokens;
                let (expected, patch) = lifecycle::complete(&job, completion);
                if !self.store.atomic_update_if(job.id, &expected, &patch).await? {
                    warn!(worker = %self.id, job_id = %job.id, "lease lost before the result was stored");
                    return Ok(Outcome::LeaseLost);
                }
                WorkerStats::bump(&self.stats.succeeded);
                info!(
                    worker = %self.id,
                    job_id = %job.id,
                    model = %job.model,
                    tokens,
                    status = %JobStatus::Processed,
                    "job processed"
                );
                Ok(Outcome::Processed)
            }
            Err(err) => {
                let failure = Failure::from(err);
                let (expected, patch) = lifecycle::fail(&job, &failure, &self.config.retry_policy, Utc::now());
                if !self.store.atomic_update_if(job.id, &expected, &patch).await? {
                    warn!(worker = %self.id, job_id = %job.id, "lease lost before the failure was stored");
                    return Ok(Outcome::LeaseLost);
                }

                let attempts = patch.attempts.unwrap_or(job.attempts);
                if patch.status == Some(JobStatus::Pending) {
                    WorkerStats::bump(&self.stats.retried);
                    warn!(
                        worker = %self.id,
                        job_id = %job.id,
                        attempts,
                        error = %failure,
                        "job failed, retry scheduled"
                    );
                    Ok(Outcome::Retrying)
                } else {
                    WorkerStats::bump(&self.stats.errored);
                    info!(
                        worker = %self.id,
                        job_id = %job.id,
                        attempts,
                        status = %JobStatus::Error,
                        error = %failure,
                        "job errored"
                    );
                    Ok(Outcome::Errored)
                }
            }
        }
    }
}

/// Read-only view of a pool's counters, shareable with request handlers.
#[derive(Debug, Clone)]
pub struct WorkerMonitor {
    stats: Arc<WorkerStats>,
    started: Instant,
    workers: usize,
}

impl WorkerMonitor {
    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot(self.started)
    }

    /// Workers the pool was started with.
    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    monitor: WorkerMonitor,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown and wait for every worker to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the workers to stop on their own (`exit_when_empty`) or
    /// through the token.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }

    pub fn monitor(&self) -> WorkerMonitor {
        self.monitor.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Spawns and owns a fixed set of [`Worker`]s.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime. They stop when `cancel`
    /// (or the returned handle) is cancelled.
    pub fn spawn(
        config: WorkerConfig,
        workers: usize,
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> WorkerPoolHandle {
        let config = Arc::new(config);
        let stats = Arc::new(WorkerStats::default());

        info!(
            pool = %config.name,
            workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            batch_size = config.batch_size,
            "starting worker pool"
        );

        let tasks = (1..=workers)
            .map(|n| {
                let worker = Worker::new(
                    WorkerId::new(format!("{}-{n}", config.name)),
                    config.clone(),
                    store.clone(),
                    dispatcher.clone(),
                    stats.clone(),
                );
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();

        WorkerPoolHandle {
            cancel,
            tasks,
            monitor: WorkerMonitor {
                stats,
                started: Instant::now(),
                workers,
            },
        }
    }
}
