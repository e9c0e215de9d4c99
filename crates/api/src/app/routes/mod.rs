use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod stream;
pub mod system;
pub mod workers;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .merge(jobs::router())
        .route("/stream", post(stream::stream_completion))
        .route("/workers/admin/overview", get(workers::overview))
}
