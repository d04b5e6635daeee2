//! Queue control endpoints: enqueue, status lookup, live configuration.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{
        Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use linkdesk_auth::AuthClaims;
use linkdesk_core::{EntityType, TaskId};
use linkdesk_infra::linking::{QueueConfigPatch, QueueError};

use crate::app::errors;
use crate::app::services::AppServices;

const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub task: Option<TaskPayload>,
    pub priority: Option<i32>,
}

/// The entity to link. Fields other than these are accepted and ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub id: Option<Value>,
    pub entity_type: Option<String>,
}

impl TaskPayload {
    /// Entity ids arrive as strings or numbers.
    fn entity_id(&self) -> Option<String> {
        let id = match self.id.as_ref()? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    }
}

pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<AuthClaims>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let Some(task) = req.task else {
        return errors::validation_error("task is required");
    };
    let Some(entity_id) = task.entity_id() else {
        return errors::validation_error("task.id is required");
    };
    let entity_type = match task.entity_type.as_deref() {
        None => EntityType::default(),
        Some(raw) => match raw.parse::<EntityType>() {
            Ok(kind) => kind,
            Err(e) => return errors::validation_error(e.to_string()),
        },
    };
    let priority = req.priority.unwrap_or(DEFAULT_PRIORITY);

    match services.queue.enqueue(entity_id, entity_type, priority) {
        Ok(queue_id) => {
            info!(
                task_id = %queue_id,
                requested_by = claims.subject(),
                "linking task accepted"
            );
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "success": true,
                    "queueId": queue_id,
                    "message": "Task queued for linking",
                })),
            )
                .into_response()
        }
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    id: Result<Path<String>, PathRejection>,
) -> Response {
    let Path(raw) = match id {
        Ok(id) => id,
        Err(rejection) => return errors::path_rejection_to_response(rejection),
    };
    let id: TaskId = match raw.parse() {
        Ok(id) => id,
        Err(e) => return errors::validation_error(format!("{e}")),
    };

    match services.queue.get(id) {
        Some(task) => Json(task).into_response(),
        None => errors::queue_error_to_response(QueueError::NotFound(id)),
    }
}

pub async fn get_config(Extension(services): Extension<Arc<AppServices>>) -> Response {
    Json(services.settings.current().as_ref().clone()).into_response()
}

pub async fn reconfigure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<AuthClaims>,
    body: Result<Json<QueueConfigPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.settings.reconfigure(&patch) {
        Ok(config) => {
            info!(
                version = config.version,
                requested_by = claims.subject(),
                "queue reconfigured"
            );
            Json(json!({ "success": true, "config": config.as_ref() })).into_response()
        }
        Err(e) => errors::config_error_to_response(e),
    }
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let config = services.settings.current();
    let dispatcher = services.monitor.snapshot();

    Json(json!({
        "queue": services.queue.stats(),
        "activeWorkers": dispatcher.active,
        "dispatcher": dispatcher,
        "configVersion": config.version,
        "enabled": config.enabled,
        "maxConcurrency": config.max_concurrency,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: Value) -> TaskPayload {
        TaskPayload {
            id: Some(id),
            entity_type: None,
        }
    }

    #[test]
    fn entity_id_accepts_strings_and_numbers() {
        assert_eq!(payload(json!("char-7")).entity_id().as_deref(), Some("char-7"));
        assert_eq!(payload(json!(42)).entity_id().as_deref(), Some("42"));
    }

    #[test]
    fn entity_id_rejects_blank_and_structured_values() {
        assert_eq!(payload(json!("   ")).entity_id(), None);
        assert_eq!(payload(json!({"nested": 1})).entity_id(), None);
        assert_eq!(payload(Value::Null).entity_id(), None);
        let missing = TaskPayload {
            id: None,
            entity_type: None,
        };
        assert_eq!(missing.entity_id(), None);
    }
}
