use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use linkdesk_auth::AuthClaims;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The verified identity behind the current request.
pub async fn whoami(Extension(claims): Extension<AuthClaims>) -> impl IntoResponse {
    Json(serde_json::json!({
        "subject": claims.subject(),
        "role": claims.role().as_str(),
        "expiresAt": claims.expires_at(),
    }))
}
