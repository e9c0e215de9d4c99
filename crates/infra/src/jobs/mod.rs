//! Job persistence, the worker scheduler and the client-facing job service.
//!
//! ## Components
//!
//! - `JobStore`: conditional-update persistence (in-memory or Postgres)
//! - `RetryingJobStore`: bounded retries for transient store failures
//! - `Worker` / `WorkerPool`: poll, claim, dispatch, resolve
//! - `JobService`: create/list/update/delete and the batch protocol

pub mod postgres;
pub mod retrying;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use postgres::PostgresJobStore;
pub use retrying::{RetryingJobStore, StoreRetryConfig};
pub use scheduler::{
    CycleReport, Outcome, Worker, WorkerConfig, WorkerMonitor, WorkerPool, WorkerPoolHandle, WorkerStats, WorkerStatsSnapshot,
};
pub use service::{JobService, ListQuery, ServiceError, ServiceResult, SummaryQuery};
pub use store::{InMemoryJobStore, JobFilter, JobSort, JobStore, StoreError};
