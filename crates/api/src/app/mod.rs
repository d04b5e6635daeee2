//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: queue, live settings and the background dispatcher
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use linkdesk_auth::AuthorizationGate;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(gate: AuthorizationGate, services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        gate: Arc::new(gate),
    };

    // Protected routes: admin credential required. The fallback sits under the
    // auth layer so unknown paths are indistinguishable from forbidden ones.
    let protected = routes::router()
        .fallback(errors::not_found)
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
