use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use promptq_core::DomainError;
use promptq_infra::jobs::ServiceError;
use promptq_jobs::BatchError;
use promptq_llm::ProviderError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        // Any failing entry rejects the whole batch as a bad request.
        ServiceError::Batch(BatchError { index, error }) => {
            let (_, code) = domain_status(&error);
            (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({
                    "error": code,
                    "message": error.to_string(),
                    "index": index,
                })),
            )
                .into_response()
        }
        ServiceError::Store(e) => {
            error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage is unavailable")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let (status, code) = domain_status(&err);
    json_error(status, code, err.to_string())
}

/// Errors raised before a stream has started.
pub fn provider_error_to_response(err: ProviderError) -> axum::response::Response {
    match err {
        ProviderError::Config(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        other => json_error(StatusCode::BAD_GATEWAY, "provider_error", other.to_string()),
    }
}

fn domain_status(err: &DomainError) -> (StatusCode, &'static str) {
    match err {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::InvalidTransition(_) => (StatusCode::BAD_REQUEST, "invalid_transition"),
        DomainError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
        DomainError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        DomainError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        DomainError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}

pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases = [
            (DomainError::validation("bad"), StatusCode::BAD_REQUEST),
            (DomainError::invalid_transition("no"), StatusCode::BAD_REQUEST),
            (DomainError::NotFound, StatusCode::NOT_FOUND),
            (DomainError::conflict("raced"), StatusCode::CONFLICT),
            (DomainError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn batch_errors_are_bad_requests() {
        let err = ServiceError::Batch(BatchError {
            index: 2,
            error: DomainError::NotFound,
        });
        assert_eq!(service_error_to_response(err).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_errors_are_internal() {
        let err = ServiceError::Store(promptq_infra::jobs::StoreError::Unavailable("down".to_string()));
        assert_eq!(service_error_to_response(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
