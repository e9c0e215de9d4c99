use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use promptq_core::JobId;
use promptq_jobs::{JobUpdate, NewJob};

use crate::app::dto::{self, BatchDeleteRequest, BatchUpdateRequest, CreateBatchRequest, JobResponse, ListJobsParams};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route(
            "/jobs/batch",
            axum::routing::post(create_batch)
                .patch(batch_update)
                .delete(batch_delete),
        )
        .route("/jobs/summary", get(summary))
        .route("/jobs/:id", get(get_job).patch(update_job).delete(delete_job))
}

fn parse_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<NewJob>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.jobs.create(principal.principal(), body).await {
        Ok(job) => (StatusCode::CREATED, Json(JobResponse::from(job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn create_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<CreateBatchRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.jobs.create_batch(principal.principal(), body.jobs).await {
        Ok(jobs) => (StatusCode::CREATED, Json(dto::job_responses(jobs))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    params: Result<Query<ListJobsParams>, QueryRejection>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(e) => return errors::query_rejection(e),
    };
    let query = match params.into_query() {
        Ok(q) => q,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.jobs.list(principal.principal(), query).await {
        Ok(jobs) => Json(dto::job_responses(jobs)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    match services.jobs.summary(principal.principal(), dto::summary_query(params)).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.get(principal.principal(), id).await {
        Ok(job) => Json(JobResponse::from(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<JobUpdate>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.jobs.update(principal.principal(), id, body).await {
        Ok(job) => Json(JobResponse::from(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.delete(principal.principal(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn batch_update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<BatchUpdateRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let updates = body.jobs.into_iter().map(|item| (item.job_id, item.update)).collect();

    match services.jobs.batch_update(principal.principal(), updates).await {
        Ok(jobs) => Json(dto::job_responses(jobs)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn batch_delete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.jobs.batch_delete(principal.principal(), body.job_ids).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
