use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{debug, warn};

use linkdesk_core::DomainError;
use linkdesk_infra::linking::{ConfigError, QueueError};

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("task {id} not found"))
        }
        QueueError::Full(_) | QueueError::Closed => {
            warn!(error = %err, "queue rejected request");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
        }
        QueueError::Domain(DomainError::Validation(msg)) => validation_error(msg),
        QueueError::Domain(DomainError::InvalidId(msg)) => validation_error(msg),
        QueueError::Domain(DomainError::InvalidTransition(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
    }
}

pub fn config_error_to_response(err: ConfigError) -> axum::response::Response {
    validation_error(err.to_string())
}

pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    debug!(error = %rejection.body_text(), "malformed request body");
    validation_error(rejection.body_text())
}

pub fn path_rejection_to_response(rejection: PathRejection) -> axum::response::Response {
    validation_error(rejection.body_text())
}

pub fn validation_error(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// The single response for every authorization failure.
pub fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

pub async fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no such route")
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
    use linkdesk_core::TaskId;

    #[test]
    fn queue_errors_map_to_statuses() {
        let cases = [
            (QueueError::NotFound(TaskId::new()), StatusCode::NOT_FOUND),
            (QueueError::Full(10), StatusCode::SERVICE_UNAVAILABLE),
            (QueueError::Closed, StatusCode::SERVICE_UNAVAILABLE),
            (
                QueueError::Domain(DomainError::validation("entity id must not be empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                QueueError::Domain(DomainError::invalid_transition("nope")),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(queue_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn config_errors_are_client_errors() {
        let err = ConfigError::BackoffInverted { base: 10, max: 1 };
        assert_eq!(config_error_to_response(err).status(), StatusCode::BAD_REQUEST);
    }
}
