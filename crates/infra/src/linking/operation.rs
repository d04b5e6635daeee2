//! The linking operation the dispatcher invokes per task.
//!
//! Implemented by the surrounding application (it owns the datastore); the
//! queue only needs success or failure back.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use linkdesk_core::EntityType;

/// Why an attempt failed. The message ends up in the task's `lastError`.
#[derive(Debug, Error)]
#[error("linking failed: {0}")]
pub struct LinkError(String);

impl LinkError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Synchronous-style "link this entity" routine, run once per attempt.
#[async_trait]
pub trait LinkingOperation: Send + Sync + 'static {
    async fn link(&self, entity_id: &str, entity_type: EntityType) -> Result<(), LinkError>;
}

/// Stand-in used by the standalone server: records the request and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLinker;

#[async_trait]
impl LinkingOperation for LoggingLinker {
    async fn link(&self, entity_id: &str, entity_type: EntityType) -> Result<(), LinkError> {
        info!(entity_id, entity_type = %entity_type, "link requested (no linker configured)");
        Ok(())
    }
}
