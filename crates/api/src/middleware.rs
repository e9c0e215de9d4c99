use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, info};

use promptq_auth::{AuthError, Authenticator, Credentials};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";
pub const CLIENT_ID_HEADER: &str = "client_id";
pub const CLIENT_KEY_HEADER: &str = "client_api_key";

#[derive(Clone)]
pub struct AuthState {
    pub authenticator: Arc<Authenticator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let credentials = extract_credentials(req.headers());

    // Argon2 verification is CPU-bound.
    let authenticator = state.authenticator.clone();
    let verified = tokio::task::spawn_blocking(move || authenticator.authenticate(&credentials))
        .await
        .map_err(|e| {
            error!(error = %e, "credential verification task failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "authentication failed")
        })?;

    let principal = verified.map_err(|e| {
        debug!(error = %e, "request rejected");
        match e {
            AuthError::Hash(_) => {
                error!(error = %e, "stored credential hash is unusable");
                json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid credentials")
            }
            other => json_error(StatusCode::UNAUTHORIZED, "unauthorized", other.to_string()),
        }
    })?;

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

/// One line per request: method, path, status and latency.
pub async fn log_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Admin key first, then the client id/key pair.
fn extract_credentials(headers: &HeaderMap) -> Credentials {
    if let Some(api_key) = header_value(headers, ADMIN_KEY_HEADER) {
        return Credentials::Admin { api_key };
    }
    match (
        header_value(headers, CLIENT_ID_HEADER),
        header_value(headers, CLIENT_KEY_HEADER),
    ) {
        (Some(client_id), Some(api_key)) => Credentials::Client { client_id, api_key },
        _ => Credentials::None,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn admin_key_wins_over_client_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("root"));
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("c-1"));
        headers.insert(CLIENT_KEY_HEADER, HeaderValue::from_static("k-1"));

        assert_eq!(
            extract_credentials(&headers),
            Credentials::Admin {
                api_key: "root".to_string()
            }
        );
    }

    #[test]
    fn client_needs_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("c-1"));
        assert_eq!(extract_credentials(&headers), Credentials::None);

        headers.insert(CLIENT_KEY_HEADER, HeaderValue::from_static("  k-1 "));
        assert_eq!(
            extract_credentials(&headers),
            Credentials::Client {
                client_id: "c-1".to_string(),
                api_key: "k-1".to_string()
            }
        );
    }

    #[test]
    fn blank_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_credentials(&headers), Credentials::None);
    }
}
