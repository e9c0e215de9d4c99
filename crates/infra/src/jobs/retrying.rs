//! Bounded retries around a [`JobStore`].
//!
//! Only [`StoreError::Unavailable`] is retried; everything else (and the
//! last transient error once the budget is spent) propagates unchanged.
//!
//! Writes are not idempotent, so a retried `create` or conditional update
//! that trips over its own earlier commit is reported as the success it was.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use promptq_core::JobId;
use promptq_jobs::{Expected, Job, JobPatch};

use super::store::{JobFilter, JobSort, JobStore, StoreError};

#[derive(Debug, Clone)]
pub struct StoreRetryConfig {
    /// Retries after the first failed call.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl StoreRetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RetryingJobStore<S> {
    inner: S,
    config: StoreRetryConfig,
}

impl<S: JobStore> RetryingJobStore<S> {
    pub fn new(inner: S, config: StoreRetryConfig) -> Self {
        Self { inner, config }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        self.run(operation, call).await.0
    }

    /// Like [`Self::with_retries`], also reporting whether any retry
    /// happened. A write whose reply was lost may already have committed, so
    /// the caller has to interpret the final answer of a retried write.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> (Result<T, StoreError>, bool)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut delay = self.config.initial_delay;
        let mut retries = 0u32;
        loop {
            match call().await {
                Err(e) if e.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    warn!(
                        operation,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_delay);
                }
                result => return (result, retries > 0),
            }
        }
    }
}

#[async_trait]
impl<S: JobStore> JobStore for RetryingJobStore<S> {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let (result, retried) = self.run("create", || self.inner.create(job.clone())).await;
        match result {
            Err(StoreError::AlreadyExists(id)) if retried => match self.inner.find_by_id(id).await? {
                Some(stored) if stored.client_id == job.client_id && stored.created_at == job.created_at => {
                    debug!(job_id = %id, "create committed before its error, keeping it");
                    Ok(())
                }
                _ => Err(StoreError::AlreadyExists(id)),
            },
            other => other,
        }
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.with_retries("find_by_id", || self.inner.find_by_id(id)).await
    }

    async fn query(&self, filter: &JobFilter, sort: JobSort, limit: Option<usize>) -> Result<Vec<Job>, StoreError> {
        self.with_retries("query", || self.inner.query(filter, sort, limit)).await
    }

    async fn atomic_update_if(&self, id: JobId, expected: &Expected, patch: &JobPatch) -> Result<bool, StoreError> {
        let (result, retried) = self
            .run("atomic_update_if", || self.inner.atomic_update_if(id, expected, patch))
            .await;
        match result {
            // The precondition can fail because an earlier attempt already
            // wrote this patch.
            Ok(false) if retried => {
                let applied = self
                    .inner
                    .find_by_id(id)
                    .await?
                    .is_some_and(|job| patch.is_applied_to(&job));
                if applied {
                    debug!(job_id = %id, "update committed before its error, keeping it");
                }
                Ok(applied)
            }
            other => other,
        }
    }

    async fn soft_delete(&self, id: JobId) -> Result<bool, StoreError> {
        let (result, retried) = self.run("soft_delete", || self.inner.soft_delete(id)).await;
        match result {
            Ok(false) if retried => Ok(self.inner.find_by_id(id).await?.is_none()),
            other => other,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
