//! Job lifecycle domain module.
//!
//! This crate contains the rules of the prompt-job queue, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage):
//!
//! - `job`: the job record and request validation
//! - `transition`: the status transition table
//! - `patch`: conditional field updates handed to a store
//! - `lifecycle`: worker-side claim/release/reclaim/resolve updates
//! - `retry`: failure classification and backoff
//! - `batch`: two-phase validation of multi-job mutations
//! - `summary`: per-status counts and metric aggregation

pub mod batch;
pub mod job;
pub mod lifecycle;
pub mod patch;
pub mod retry;
pub mod summary;
pub mod transition;

pub use batch::{plan_mutation, validate_batch, BatchEntry, BatchError, BatchMutation, PlannedAction, PlannedMutation};
pub use job::{Job, JobStatus, JobUpdate, Lease, NewJob, ProcessingMetrics, ReferenceCheck, Usage};
pub use lifecycle::Completion;
pub use patch::{Expected, JobPatch};
pub use retry::{Failure, FailureClass, FailureKind, RetryPolicy};
pub use summary::{JobSummary, MetricsSummary};
pub use transition::{check_transition, Actor};
