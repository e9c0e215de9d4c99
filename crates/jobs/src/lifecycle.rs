//! Worker-side updates: claim, release, reclaim and resolution.
//!
//! Each function returns the precondition and patch to hand to the store's
//! conditional update; none of them touch a store directly.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use promptq_core::WorkerId;

use crate::job::{Job, JobStatus, Lease, ProcessingMetrics, Usage};
use crate::patch::{Expected, JobPatch};
use crate::retry::{Failure, FailureKind, RetryDecision, RetryPolicy};

/// Successful provider output, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub response_data: Option<Value>,
    pub usage: Usage,
    pub metrics: ProcessingMetrics,
}

/// PENDING -> PROCESSING with a fresh lease.
pub fn claim(worker: &WorkerId, now: DateTime<Utc>, ttl: Duration) -> (Expected, JobPatch) {
    let lease = Lease {
        worker_id: worker.clone(),
        claimed_at: now,
        expires_at: now + ttl,
    };
    let patch = JobPatch::new()
        .with_status(JobStatus::Processing)
        .with_lease(Some(lease));
    (Expected::status(JobStatus::Pending), patch)
}

/// Give a claimed job back untouched (shutdown before dispatch).
pub fn release(job: &Job) -> (Expected, JobPatch) {
    let patch = JobPatch::new()
        .with_status(JobStatus::Pending)
        .with_lease(None);
    (Expected::current_lease_of(job), patch)
}

/// PROCESSING -> PROCESSED with the provider output.
pub fn complete(job: &Job, completion: Completion) -> (Expected, JobPatch) {
    let mut patch = JobPatch::new()
        .with_status(JobStatus::Processed)
        .with_lease(None)
        .with_not_before(None);
    patch.result = Some(Some(completion.text));
    patch.response_data = Some(completion.response_data);
    patch.usage = Some(Some(completion.usage));
    patch.processing_metrics = Some(Some(completion.metrics));
    patch.last_error = Some(None);
    (Expected::current_lease_of(job), patch)
}

/// Route a failed attempt through the retry policy.
///
/// Retryable failures go back to PENDING behind a backoff window; the rest
/// (and retries past `max_attempts`) end in ERROR.
pub fn fail(job: &Job, failure: &Failure, policy: &RetryPolicy, now: DateTime<Utc>) -> (Expected, JobPatch) {
    let patch = match policy.decide(job.attempts, failure) {
        RetryDecision::Retry { attempts, delay } => {
            let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::days(365));
            JobPatch::new()
                .with_status(JobStatus::Pending)
                .with_attempts(attempts)
                .with_lease(None)
                .with_not_before(Some(now + delay))
                .with_last_error(failure.message.clone())
        }
        RetryDecision::GiveUp { attempts } => JobPatch::new()
            .with_status(JobStatus::Error)
            .with_attempts(attempts)
            .with_lease(None)
            .with_last_error(failure.message.clone()),
    };
    (Expected::current_lease_of(job), patch)
}

/// Recover a job whose lease ran out: PENDING again with one more attempt,
/// or ERROR once the attempts are used up.
pub fn reclaim(job: &Job, policy: &RetryPolicy) -> (Expected, JobPatch) {
    let holder = job
        .lease
        .as_ref()
        .map(|l| l.worker_id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let failure = Failure::new(
        FailureKind::LeaseExpired,
        format!("lease held by {holder} expired before the job was resolved"),
    );

    // Reclaimed jobs are eligible again right away; no backoff window.
    let (status, attempts) = match policy.decide(job.attempts, &failure) {
        RetryDecision::Retry { attempts, .. } => (JobStatus::Pending, attempts),
        RetryDecision::GiveUp { attempts } => (JobStatus::Error, attempts),
    };
    let patch = JobPatch::new()
        .with_status(status)
        .with_attempts(attempts)
        .with_lease(None)
        .with_last_error(failure.message);
    (Expected::current_lease_of(job), patch)
}
