//! Job storage.
//!
//! Every read path excludes soft-deleted jobs. Writes after creation go
//! through [`JobStore::atomic_update_if`], a compare-and-set against an
//! [`Expected`] precondition; workers and the batch applier rely on it being
//! atomic per job.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use promptq_core::{ClientId, JobId};
use promptq_jobs::{Expected, Job, JobPatch, JobStatus};

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the id is already taken.
    async fn create(&self, job: Job) -> Result<(), StoreError>;

    /// Get a live (not deleted) job by id.
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Live jobs matching `filter`, in `sort` order, at most `limit` of them.
    async fn query(&self, filter: &JobFilter, sort: JobSort, limit: Option<usize>) -> Result<Vec<Job>, StoreError>;

    /// Apply `patch` only if the stored job still matches `expected`.
    ///
    /// Returns `false` when the precondition did not hold (or the job is
    /// gone); nothing is written in that case.
    async fn atomic_update_if(&self, id: JobId, expected: &Expected, patch: &JobPatch) -> Result<bool, StoreError>;

    /// Mark a job deleted. Returns `false` if it was missing or already
    /// deleted.
    async fn soft_delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Check that the backing storage answers.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        (**self).create(job).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn query(&self, filter: &JobFilter, sort: JobSort, limit: Option<usize>) -> Result<Vec<Job>, StoreError> {
        (**self).query(filter, sort, limit).await
    }

    async fn atomic_update_if(&self, id: JobId, expected: &Expected, patch: &JobPatch) -> Result<bool, StoreError> {
        (**self).atomic_update_if(id, expected, patch).await
    }

    async fn soft_delete(&self, id: JobId) -> Result<bool, StoreError> {
        (**self).soft_delete(id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    /// Connection-level trouble; worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt job document: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Storage("job map lock poisoned".to_string())
    }
}

/// Result ordering for [`JobStore::query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobSort {
    /// Claim order: priority descending, then oldest first.
    PriorityThenAge,
    /// Most recently created first.
    #[default]
    Newest,
}

/// Conjunction of optional predicates over live jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub client_id: Option<ClientId>,
    /// Any of these statuses; empty means any status.
    pub statuses: Vec<JobStatus>,
    pub operation: Option<String>,
    pub model: Option<String>,
    pub priority: Option<i32>,
    /// Any of these ids; empty means any id.
    pub ids: Vec<JobId>,
    /// PENDING and past its `notBefore` at this instant.
    pub claimable_at: Option<DateTime<Utc>>,
    /// PROCESSING with a lease that ran out at this instant.
    pub lease_expired_at: Option<DateTime<Utc>>,
    /// `clientReference.<key> == value` pairs.
    pub client_reference: Vec<(String, String)>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs a poll cycle may claim at `now`.
    pub fn claimable(now: DateTime<Utc>) -> Self {
        Self {
            claimable_at: Some(now),
            ..Self::default()
        }
    }

    /// Jobs whose lease ran out by `now`.
    pub fn expired_leases(now: DateTime<Utc>) -> Self {
        Self {
            lease_expired_at: Some(now),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn with_client_reference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_reference.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if job.is_deleted {
            return false;
        }
        if self.client_id.is_some_and(|c| c != job.client_id) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if self.operation.as_deref().is_some_and(|op| op != job.operation) {
            return false;
        }
        if self.model.as_deref().is_some_and(|m| m != job.model) {
            return false;
        }
        if self.priority.is_some_and(|p| p != job.priority) {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.contains(&job.id) {
            return false;
        }
        if self.claimable_at.is_some_and(|now| !job.is_claimable(now)) {
            return false;
        }
        if self.lease_expired_at.is_some_and(|now| !job.has_expired_lease(now)) {
            return false;
        }
        self.client_reference
            .iter()
            .all(|(key, value)| reference_matches(job.client_reference.as_ref(), key, value))
    }
}

/// String values compare as-is; other JSON scalars by their JSON text.
fn reference_matches(reference: Option<&Value>, key: &str, expected: &str) -> bool {
    match reference.and_then(|r| r.get(key)) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

pub(crate) fn sort_jobs(jobs: &mut [Job], sort: JobSort) {
    match sort {
        JobSort::PriorityThenAge => jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        }),
        JobSort::Newest => jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))),
    }
}

/// In-memory job store for tests/dev.
///
/// The write lock makes each conditional update atomic within this process.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored jobs, deleted ones included.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read()?;
        Ok(jobs.get(&id).filter(|j| !j.is_deleted).cloned())
    }

    async fn query(&self, filter: &JobFilter, sort: JobSort, limit: Option<usize>) -> Result<Vec<Job>, StoreError> {
        let mut result: Vec<Job> = {
            let jobs = self.jobs.read()?;
            jobs.values().filter(|j| filter.matches(j)).cloned().collect()
        };
        sort_jobs(&mut result, sort);
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn atomic_update_if(&self, id: JobId, expected: &Expected, patch: &JobPatch) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write()?;
        match jobs.get_mut(&id) {
            Some(job) if expected.matches(job) => {
                patch.apply(job, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete(&self, id: JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write()?;
        match jobs.get_mut(&id) {
            Some(job) if !job.is_deleted => {
                let now = Utc::now();
                job.is_deleted = true;
                job.deleted_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
