//! Admin view of the worker pool running in this process.

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};
use serde_json::json;

use promptq_core::DomainError;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// GET /workers/admin/overview
pub async fn overview(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if !principal.principal().is_admin() {
        return errors::domain_error_to_response(DomainError::Unauthorized);
    }

    let body = match &services.workers {
        Some(monitor) => {
            let stats = monitor.stats();
            json!({
                "workerCount": monitor.worker_count(),
                "running": stats.active_workers > 0,
                "stats": stats,
            })
        }
        None => json!({
            "workerCount": 0,
            "running": false,
            "stats": null,
        }),
    };
    Json(body).into_response()
}
