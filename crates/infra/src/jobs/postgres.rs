//! Postgres-backed job store.
//!
//! Each job is one row: the full document lives in `doc` (JSONB) and the
//! fields that queries filter or sort on are mirrored into plain columns.
//! A `version` counter is bumped on every write.
//!
//! ## Conditional updates
//!
//! `atomic_update_if` reads the row, checks the [`Expected`] precondition
//! and then issues a single
//! `UPDATE ... WHERE id = $1 AND version = $2 AND status = $3 AND NOT is_deleted`.
//! If any other write landed in between, the version no longer matches, no
//! row is updated, and the call reports `false`. Postgres evaluates that
//! statement atomically across every replica sharing the database.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database, unique violation (`23505`) on insert | `AlreadyExists` |
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` (retryable) |
//! | Decode / ColumnDecode | `Corrupt` |
//! | anything else | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use promptq_core::JobId;
use promptq_jobs::{Expected, Job, JobPatch};

use super::store::{JobFilter, JobSort, JobStore, StoreError};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        client_id UUID NOT NULL,
        status TEXT NOT NULL,
        operation TEXT NOT NULL,
        model TEXT NOT NULL,
        priority INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        not_before TIMESTAMPTZ,
        lease_worker TEXT,
        lease_expires_at TIMESTAMPTZ,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL DEFAULT 1,
        doc JSONB NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_claim_idx
        ON jobs (status, priority DESC, created_at ASC)
        WHERE NOT is_deleted
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_client_idx
        ON jobs (client_id, created_at DESC)
        WHERE NOT is_deleted
    "#,
];

/// Postgres-backed job store.
///
/// `Send + Sync`; the SQLx pool handles connection sharing.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `url` and make sure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn load_versioned(&self, id: JobId) -> Result<Option<(Job, i64)>, StoreError> {
        let row = sqlx::query("SELECT doc, version FROM jobs WHERE id = $1 AND NOT is_deleted")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_versioned", e))?;

        row.map(|row| {
            let job = decode_doc(&row)?;
            let version: i64 = row.try_get("version").map_err(|e| map_sqlx_error("load_versioned", e))?;
            Ok((job, version))
        })
        .transpose()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let columns = JobColumns::from(&job);
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, client_id, status, operation, model, priority, attempts,
                not_before, lease_worker, lease_expires_at, is_deleted,
                created_at, updated_at, version, doc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1, $14)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.client_id.as_uuid())
        .bind(columns.status)
        .bind(&job.operation)
        .bind(&job.model)
        .bind(job.priority)
        .bind(columns.attempts)
        .bind(job.not_before)
        .bind(columns.lease_worker)
        .bind(columns.lease_expires_at)
        .bind(job.is_deleted)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(Json(&job))
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.load_versioned(id).await?.map(|(job, _)| job))
    }

    #[instrument(skip(self, filter), fields(job_count = tracing::field::Empty), err)]
    async fn query(&self, filter: &JobFilter, sort: JobSort, limit: Option<usize>) -> Result<Vec<Job>, StoreError> {
        let mut qb = select_matching(filter);
        qb.push(match sort {
            JobSort::PriorityThenAge => " ORDER BY priority DESC, created_at ASC, id ASC",
            JobSort::Newest => " ORDER BY created_at DESC, id DESC",
        });
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query", e))?;
        let jobs = rows.iter().map(decode_doc).collect::<Result<Vec<_>, _>>()?;

        Span::current().record("job_count", jobs.len());
        Ok(jobs)
    }

    #[instrument(skip(self, expected, patch), fields(job_id = %id, expected = %expected.status), err)]
    async fn atomic_update_if(&self, id: JobId, expected: &Expected, patch: &JobPatch) -> Result<bool, StoreError> {
        let Some((mut job, version)) = self.load_versioned(id).await? else {
            return Ok(false);
        };
        if !expected.matches(&job) {
            return Ok(false);
        }
        patch.apply(&mut job, Utc::now());

        let columns = JobColumns::from(&job);
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $4,
                operation = $5,
                model = $6,
                priority = $7,
                attempts = $8,
                not_before = $9,
                lease_worker = $10,
                lease_expires_at = $11,
                updated_at = $12,
                version = version + 1,
                doc = $13
            WHERE id = $1 AND version = $2 AND status = $3 AND NOT is_deleted
            "#,
        )
        .bind(id.as_uuid())
        .bind(version)
        .bind(expected.status.as_str())
        .bind(columns.status)
        .bind(&job.operation)
        .bind(&job.model)
        .bind(job.priority)
        .bind(columns.attempts)
        .bind(job.not_before)
        .bind(columns.lease_worker)
        .bind(columns.lease_expires_at)
        .bind(job.updated_at)
        .bind(Json(&job))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("atomic_update_if", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn soft_delete(&self, id: JobId) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT doc FROM jobs WHERE id = $1 AND NOT is_deleted FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("soft_delete", e))?;
        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(false);
        };

        let mut job = decode_doc(&row)?;
        let now = Utc::now();
        job.is_deleted = true;
        job.deleted_at = Some(now);
        job.updated_at = now;

        sqlx::query(
            r#"
            UPDATE jobs
            SET is_deleted = TRUE, updated_at = $2, version = version + 1, doc = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .bind(Json(&job))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("soft_delete", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

/// `SELECT doc` with one `AND` clause per set predicate.
fn select_matching(filter: &JobFilter) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new("SELECT doc FROM jobs WHERE NOT is_deleted");

    if let Some(client_id) = filter.client_id {
        qb.push(" AND client_id = ").push_bind(Uuid::from(client_id));
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<&'static str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(operation) = &filter.operation {
        qb.push(" AND operation = ").push_bind(operation.as_str());
    }
    if let Some(model) = &filter.model {
        qb.push(" AND model = ").push_bind(model.as_str());
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority);
    }
    if !filter.ids.is_empty() {
        let ids: Vec<Uuid> = filter.ids.iter().map(|id| Uuid::from(*id)).collect();
        qb.push(" AND id = ANY(").push_bind(ids).push(")");
    }
    if let Some(now) = filter.claimable_at {
        qb.push(" AND status = 'PENDING' AND (not_before IS NULL OR not_before <= ")
            .push_bind(now)
            .push(")");
    }
    if let Some(now) = filter.lease_expired_at {
        qb.push(" AND status = 'PROCESSING' AND lease_expires_at <= ").push_bind(now);
    }
    for (key, value) in &filter.client_reference {
        qb.push(" AND doc->'clientReference'->>")
            .push_bind(key.as_str())
            .push(" = ")
            .push_bind(value.as_str());
    }
    qb
}

/// Mirrored columns that need converting from the document.
struct JobColumns {
    status: &'static str,
    attempts: i32,
    lease_worker: Option<String>,
    lease_expires_at: Option<chrono::DateTime<Utc>>,
}

impl From<&Job> for JobColumns {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status.as_str(),
            attempts: i32::try_from(job.attempts).unwrap_or(i32::MAX),
            lease_worker: job.lease.as_ref().map(|l| l.worker_id.to_string()),
            lease_expires_at: job.lease.as_ref().map(|l| l.expires_at),
        }
    }
}

fn decode_doc(row: &PgRow) -> Result<Job, StoreError> {
    let Json(job) = row
        .try_get::<Json<Job>, _>("doc")
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize job row: {e}")))?;
    Ok(job)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable(format!("connection pool timed out in {operation}")),
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::Decode(e) => StoreError::Corrupt(format!("decode error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Corrupt(format!("column {index} failed to decode in {operation}: {source}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::test_support::job;
    use promptq_core::ClientId;
    use promptq_jobs::JobStatus;

    #[test]
    fn filter_renders_one_clause_per_predicate() {
        let now = Utc::now();
        let filter = JobFilter::claimable(now)
            .with_client(ClientId::new())
            .with_status(JobStatus::Pending)
            .with_model("gpt-test")
            .with_client_reference("batch", "b-1");

        let qb = select_matching(&filter);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT doc FROM jobs WHERE NOT is_deleted"));
        assert!(sql.contains("client_id = $1"));
        assert!(sql.contains("status = ANY($2)"));
        assert!(sql.contains("model = $3"));
        assert!(sql.contains("not_before <= $4"));
        assert!(sql.contains("doc->'clientReference'->>$5 = $6"));
    }

    #[test]
    fn empty_filter_only_excludes_deleted() {
        let filter = JobFilter::new();
        let qb = select_matching(&filter);
        assert_eq!(qb.sql(), "SELECT doc FROM jobs WHERE NOT is_deleted");
    }

    #[test]
    fn mirrored_columns_follow_the_lease() {
        let mut j = job(ClientId::new(), 10);
        assert!(JobColumns::from(&j).lease_worker.is_none());

        j.status = JobStatus::Processing;
        j.attempts = 2;
        j.lease = Some(promptq_jobs::Lease {
            worker_id: promptq_core::WorkerId::new("w-3"),
            claimed_at: j.created_at,
            expires_at: j.created_at + chrono::Duration::seconds(300),
        });
        let columns = JobColumns::from(&j);
        assert_eq!(columns.status, "PROCESSING");
        assert_eq!(columns.attempts, 2);
        assert_eq!(columns.lease_worker.as_deref(), Some("w-3"));
    }

    #[test]
    fn pool_errors_are_retryable() {
        assert!(map_sqlx_error("query", sqlx::Error::PoolTimedOut).is_transient());
        assert!(!map_sqlx_error("query", sqlx::Error::RowNotFound).is_transient());
    }
}
