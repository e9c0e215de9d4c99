use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use promptq_infra::jobs::JobStore;

use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The process is up and serving requests.
pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// Ready once the job store answers.
pub async fn ready(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store().ping().await {
        Ok(()) => Json(json!({
            "status": "ready",
            "checks": { "store": { "status": "healthy" } },
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": { "store": { "status": "unhealthy", "error": e.to_string() } },
                })),
            )
                .into_response()
        }
    }
}
