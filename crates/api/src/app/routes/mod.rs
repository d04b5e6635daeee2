use axum::{
    Router,
    routing::{get, post},
};

pub mod queue;
pub mod system;

/// Router for all admin-gated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/queue/tasks", post(queue::enqueue))
        .route("/queue/tasks/:id", get(queue::get_task))
        .route("/queue/config", get(queue::get_config).post(queue::reconfigure))
        .route("/queue/stats", get(queue::stats))
}
