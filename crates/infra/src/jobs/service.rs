//! Client-facing job operations.
//!
//! Validation and transition rules come from `promptq-jobs`; this layer
//! resolves ownership against the store, runs the two-phase batch protocol
//! and turns validated plans into conditional store writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use promptq_auth::{authorize_job_access, Principal};
use promptq_core::{ClientId, DomainError, JobId};
use promptq_jobs::{
    plan_mutation, validate_batch, BatchEntry, BatchError, BatchMutation, Job, JobStatus, JobSummary, JobUpdate,
    NewJob, PlannedAction, PlannedMutation,
};
use promptq_llm::Dispatcher;

use super::store::{JobFilter, JobSort, JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Filters for listing jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    pub operation: Option<String>,
    pub model: Option<String>,
    pub priority: Option<i32>,
    pub limit: Option<usize>,
}

/// Filters for the summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryQuery {
    pub operation: Option<String>,
    pub model: Option<String>,
    /// `clientReference.<key> == value` pairs.
    pub client_reference: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn create(&self, principal: &Principal, new: NewJob) -> ServiceResult<Job> {
        let owner = job_owner(principal)?;
        new.validate(&*self.dispatcher)?;

        let job = Job::create(owner, new, Utc::now());
        self.store.create(job.clone()).await?;
        info!(job_id = %job.id, client_id = %owner, model = %job.model, "job created");
        Ok(job)
    }

    /// Validate every entry first; create none of them if any fails.
    pub async fn create_batch(&self, principal: &Principal, batch: Vec<NewJob>) -> ServiceResult<Vec<Job>> {
        let owner = job_owner(principal)?;
        if batch.is_empty() {
            return Err(BatchError {
                index: 0,
                error: DomainError::validation("batch must contain at least one job"),
            }
            .into());
        }
        for (index, new) in batch.iter().enumerate() {
            new.validate(&*self.dispatcher)
                .map_err(|error| BatchError { index, error })?;
        }

        let now = Utc::now();
        let jobs: Vec<Job> = batch.into_iter().map(|new| Job::create(owner, new, now)).collect();
        for (created, job) in jobs.iter().enumerate() {
            if let Err(e) = self.store.create(job.clone()).await {
                self.roll_back_creates(&jobs[..created]).await;
                return Err(e.into());
            }
        }

        info!(client_id = %owner, count = jobs.len(), "job batch created");
        Ok(jobs)
    }

    /// Best effort: hide the jobs a failed batch create already wrote.
    async fn roll_back_creates(&self, jobs: &[Job]) {
        for job in jobs {
            if let Err(e) = self.store.soft_delete(job.id).await {
                warn!(job_id = %job.id, error = %e, "could not roll back partially created batch");
            }
        }
    }

    /// Clients see their own jobs, the admin sees all.
    pub async fn list(&self, principal: &Principal, query: ListQuery) -> ServiceResult<Vec<Job>> {
        if query.limit == Some(0) {
            return Err(DomainError::validation("limit must be at least 1").into());
        }
        let mut filter = scoped_filter(principal);
        filter.statuses.extend(query.status);
        filter.operation = query.operation;
        filter.model = query.model;
        filter.priority = query.priority;

        Ok(self.store.query(&filter, JobSort::Newest, query.limit).await?)
    }

    pub async fn get(&self, principal: &Principal, id: JobId) -> ServiceResult<Job> {
        let job = self.store.find_by_id(id).await?.ok_or(DomainError::NotFound)?;
        authorize_job_access(principal, job.client_id)?;
        Ok(job)
    }

    /// Status change and/or field edits on one job.
    pub async fn update(&self, principal: &Principal, id: JobId, update: JobUpdate) -> ServiceResult<Job> {
        let job = self.store.find_by_id(id).await?;
        let plan = plan_mutation(job.as_ref(), &BatchMutation::Update(update), principal, &*self.dispatcher)?;
        self.apply(&plan).await?;
        self.reload(id).await
    }

    pub async fn delete(&self, principal: &Principal, id: JobId) -> ServiceResult<()> {
        let job = self.store.find_by_id(id).await?.ok_or(DomainError::NotFound)?;
        authorize_job_access(principal, job.client_id)?;
        if !self.store.soft_delete(id).await? {
            return Err(DomainError::NotFound.into());
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Apply every update, or none if any entry fails validation.
    ///
    /// Returns the updated jobs in request order.
    pub async fn batch_update(&self, principal: &Principal, updates: Vec<(JobId, JobUpdate)>) -> ServiceResult<Vec<Job>> {
        let entries: Vec<BatchEntry> = updates
            .into_iter()
            .map(|(id, update)| BatchEntry::update(id, update))
            .collect();
        let ids: Vec<JobId> = entries.iter().map(|e| e.job_id).collect();

        self.run_batch(principal, &entries).await?;

        let mut by_id: HashMap<JobId, Job> = self.snapshot(&ids).await?;
        ids.iter()
            .map(|id| by_id.remove(id).ok_or_else(|| ServiceError::from(DomainError::NotFound)))
            .collect()
    }

    /// Soft-delete every job, or none if any entry fails validation.
    pub async fn batch_delete(&self, principal: &Principal, ids: Vec<JobId>) -> ServiceResult<()> {
        let entries: Vec<BatchEntry> = ids.into_iter().map(BatchEntry::delete).collect();
        self.run_batch(principal, &entries).await
    }

    pub async fn summary(&self, principal: &Principal, query: SummaryQuery) -> ServiceResult<JobSummary> {
        let mut filter = scoped_filter(principal);
        filter.operation = query.operation;
        filter.model = query.model;
        filter.client_reference = query.client_reference;

        let jobs = self.store.query(&filter, JobSort::Newest, None).await?;
        Ok(JobSummary::from_jobs(&jobs))
    }

    /// Phase 1 against a fresh snapshot, then phase 2 one job at a time.
    async fn run_batch(&self, principal: &Principal, entries: &[BatchEntry]) -> ServiceResult<()> {
        let ids: Vec<JobId> = entries.iter().map(|e| e.job_id).collect();
        let snapshot = self.snapshot(&ids).await?;
        let plans = validate_batch(entries, &snapshot, principal, &*self.dispatcher)?;

        for plan in &plans {
            self.apply(plan).await?;
        }
        info!(principal = %principal, count = plans.len(), "batch applied");
        Ok(())
    }

    async fn snapshot(&self, ids: &[JobId]) -> ServiceResult<HashMap<JobId, Job>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let filter = JobFilter::new().with_ids(ids.iter().copied());
        let jobs = self.store.query(&filter, JobSort::Newest, None).await?;
        Ok(jobs.into_iter().map(|job| (job.id, job)).collect())
    }

    async fn apply(&self, plan: &PlannedMutation) -> ServiceResult<()> {
        let applied = match &plan.action {
            PlannedAction::Patch(patch) => self.store.atomic_update_if(plan.job_id, &plan.expected, patch).await?,
            PlannedAction::Delete => self.store.soft_delete(plan.job_id).await?,
        };
        if !applied {
            warn!(job_id = %plan.job_id, expected = %plan.expected.status, "job changed while the update was applied");
            return Err(DomainError::conflict(format!("job {} changed concurrently, retry the request", plan.job_id)).into());
        }
        Ok(())
    }

    async fn reload(&self, id: JobId) -> ServiceResult<Job> {
        Ok(self.store.find_by_id(id).await?.ok_or(DomainError::NotFound)?)
    }
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService").finish_non_exhaustive()
    }
}

/// Jobs are always owned by a client; the admin principal has no client to
/// own them.
fn job_owner(principal: &Principal) -> Result<ClientId, DomainError> {
    principal.client_id().ok_or(DomainError::Unauthorized)
}

fn scoped_filter(principal: &Principal) -> JobFilter {
    match principal.client_id() {
        Some(client_id) => JobFilter::new().with_client(client_id),
        None => JobFilter::new(),
    }
}
