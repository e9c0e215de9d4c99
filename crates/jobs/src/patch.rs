//! Conditional updates handed to the job store.
//!
//! A store applies a [`JobPatch`] only while the stored job still matches
//! the [`Expected`] precondition, in one atomic step. That compare-and-set is
//! the only mutual-exclusion mechanism in the system.

use chrono::{DateTime, Utc};
use serde_json::Value;

use promptq_core::WorkerId;

use crate::job::{Job, JobStatus, Lease, ProcessingMetrics, Usage};

/// Precondition of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub status: JobStatus,
    /// When set, the job must also still be leased to this worker at this
    /// attempt count (the lease generation).
    pub lease: Option<(WorkerId, u32)>,
}

impl Expected {
    pub fn status(status: JobStatus) -> Self {
        Self { status, lease: None }
    }

    /// PROCESSING under the lease `worker` took at `attempts`.
    pub fn lease(worker: WorkerId, attempts: u32) -> Self {
        Self {
            status: JobStatus::Processing,
            lease: Some((worker, attempts)),
        }
    }

    /// Precondition that pins the exact lease generation `job` is in.
    pub fn current_lease_of(job: &Job) -> Self {
        match &job.lease {
            Some(lease) => Self::lease(lease.worker_id.clone(), job.attempts),
            None => Self::status(job.status),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        if job.is_deleted || job.status != self.status {
            return false;
        }
        match &self.lease {
            None => true,
            Some((worker, attempts)) => {
                job.attempts == *attempts
                    && job.lease.as_ref().is_some_and(|l| &l.worker_id == worker)
            }
        }
    }
}

/// A set of field assignments. `None` leaves a field alone; `Some(None)`
/// clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub operation: Option<String>,
    pub prompts: Option<Vec<String>>,
    pub working_prompts: Option<Option<Vec<String>>>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<Option<u32>>,
    pub priority: Option<i32>,
    pub request_data: Option<Value>,
    pub client_reference: Option<Option<Value>>,
    pub attempts: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub result: Option<Option<String>>,
    pub response_data: Option<Option<Value>>,
    pub usage: Option<Option<Usage>>,
    pub processing_metrics: Option<Option<ProcessingMetrics>>,
    pub lease: Option<Option<Lease>>,
    pub not_before: Option<Option<DateTime<Utc>>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn with_lease(mut self, lease: Option<Lease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn with_not_before(mut self, not_before: Option<DateTime<Utc>>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Assign every set field and bump `updated_at`.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(v) = self.status {
            job.status = v;
        }
        if let Some(v) = &self.operation {
            job.operation = v.clone();
        }
        if let Some(v) = &self.prompts {
            job.prompts = v.clone();
        }
        if let Some(v) = &self.working_prompts {
            job.working_prompts = v.clone();
        }
        if let Some(v) = &self.model {
            job.model = v.clone();
        }
        if let Some(v) = self.temperature {
            job.temperature = v;
        }
        if let Some(v) = self.max_tokens {
            job.max_tokens = v;
        }
        if let Some(v) = self.priority {
            job.priority = v;
        }
        if let Some(v) = &self.request_data {
            job.request_data = v.clone();
        }
        if let Some(v) = &self.client_reference {
            job.client_reference = v.clone();
        }
        if let Some(v) = self.attempts {
            job.attempts = v;
        }
        if let Some(v) = &self.last_error {
            job.last_error = v.clone();
        }
        if let Some(v) = &self.result {
            job.result = v.clone();
        }
        if let Some(v) = &self.response_data {
            job.response_data = v.clone();
        }
        if let Some(v) = self.usage {
            job.usage = v;
        }
        if let Some(v) = &self.processing_metrics {
            job.processing_metrics = v.clone();
        }
        if let Some(v) = &self.lease {
            job.lease = v.clone();
        }
        if let Some(v) = self.not_before {
            job.not_before = v;
        }
        job.updated_at = now;
    }

    /// Whether `job` already holds every value this patch assigns.
    pub fn is_applied_to(&self, job: &Job) -> bool {
        let mut patched = job.clone();
        self.apply(&mut patched, job.updated_at);
        patched == *job
    }
}
