use std::sync::Arc;

use axum::{extract::Extension, routing::get, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

pub fn build_app(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        authenticator: services.authenticator.clone(),
    };

    let health = Router::new()
        .route("/health", get(routes::system::health))
        .route("/health/live", get(routes::system::live))
        .route("/health/ready", get(routes::system::ready))
        .layer(Extension(services.clone()));

    // Protected routes: require a resolved principal.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .merge(health)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::log_requests)))
}
