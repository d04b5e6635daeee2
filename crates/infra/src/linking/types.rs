//! Task record model and state transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use linkdesk_core::{DomainError, EntityType, TaskId};

use super::config::QueueConfig;

/// Lifecycle state of a queued linking task.
///
/// `queued → processing → {succeeded | failed | retrying}`, and
/// `retrying → queued` once the backoff window has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for dequeue
    Queued,
    /// A worker owns the current attempt
    Processing,
    /// Failed, waiting out its backoff delay
    Retrying,
    /// Linked successfully
    Succeeded,
    /// Exhausted its retries
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single linking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
}

/// What settling an attempt did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    /// Rescheduled; not eligible again until `delay` has elapsed.
    Retry { delay: Duration },
    Failed,
}

/// A linking task as tracked by the queue.
///
/// Callers only ever see clones; the queue owns the live record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    pub id: TaskId,
    pub entity_id: String,
    pub entity_type: EntityType,
    /// Higher values are dequeued first.
    pub priority: i32,
    pub status: TaskStatus,
    /// Attempts started so far (incremented when an attempt begins).
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Earliest time a retry may be picked up.
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl QueuedTask {
    pub(crate) fn new(
        entity_id: String,
        entity_type: EntityType,
        priority: i32,
        sequence: u64,
    ) -> Result<Self, DomainError> {
        if entity_id.trim().is_empty() {
            return Err(DomainError::validation("entity id must not be empty"));
        }

        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            entity_id,
            entity_type,
            priority,
            status: TaskStatus::Queued,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            last_error: None,
            not_before: None,
            sequence,
        })
    }

    /// Begin an attempt. Only a `Queued` task can be picked up.
    pub(crate) fn mark_processing(&mut self) -> Result<(), DomainError> {
        if self.status != TaskStatus::Queued {
            return Err(DomainError::invalid_transition(format!(
                "task {} is {}, expected queued",
                self.id, self.status
            )));
        }

        let now = Utc::now();
        self.status = TaskStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.not_before = None;
        self.updated_at = now;
        Ok(())
    }

    /// Record the outcome of the in-flight attempt under `policy`.
    pub(crate) fn settle(
        &mut self,
        outcome: AttemptOutcome,
        policy: &QueueConfig,
    ) -> Result<Settlement, DomainError> {
        if self.status != TaskStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "task {} is {}, expected processing",
                self.id, self.status
            )));
        }

        let now = Utc::now();
        self.updated_at = now;

        match outcome {
            AttemptOutcome::Succeeded => {
                self.status = TaskStatus::Succeeded;
                Ok(Settlement::Succeeded)
            }
            AttemptOutcome::Failed(error) => {
                self.last_error = Some(error);
                if policy.allows_retry(self.attempts) {
                    let delay = policy.backoff_for(self.attempts);
                    self.status = TaskStatus::Retrying;
                    // Delays are bounded by config validation; an out-of-range
                    // instant is left unset rather than wrapped.
                    self.not_before = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d));
                    Ok(Settlement::Retry { delay })
                } else {
                    self.status = TaskStatus::Failed;
                    Ok(Settlement::Failed)
                }
            }
        }
    }

    /// Backoff elapsed: eligible for dequeue again.
    pub(crate) fn requeue(&mut self) {
        if self.status == TaskStatus::Retrying {
            self.status = TaskStatus::Queued;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(retry_limit: u32) -> QueueConfig {
        QueueConfig {
            retry_limit,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..Default::default()
        }
    }

    fn task() -> QueuedTask {
        QueuedTask::new("task-42".to_string(), EntityType::Task, 1, 0).unwrap()
    }

    #[test]
    fn empty_entity_id_is_rejected() {
        let err = QueuedTask::new("  ".to_string(), EntityType::Account, 1, 0).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn successful_lifecycle() {
        let mut t = task();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.attempts, 0);

        t.mark_processing().unwrap();
        assert_eq!(t.status, TaskStatus::Processing);
        assert_eq!(t.attempts, 1);
        assert!(t.last_attempt_at.is_some());

        let settled = t.settle(AttemptOutcome::Succeeded, &policy(3)).unwrap();
        assert_eq!(settled, Settlement::Succeeded);
        assert!(t.status.is_terminal());
    }

    #[test]
    fn failure_schedules_retry_then_fails_after_limit() {
        let policy = policy(1);
        let mut t = task();

        t.mark_processing().unwrap();
        let settled = t
            .settle(AttemptOutcome::Failed("datastore timeout".into()), &policy)
            .unwrap();
        assert_eq!(
            settled,
            Settlement::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(t.status, TaskStatus::Retrying);
        assert!(t.not_before.is_some());
        assert_eq!(t.last_error.as_deref(), Some("datastore timeout"));

        // Still backing off: cannot be picked up.
        assert!(t.mark_processing().is_err());

        t.requeue();
        t.mark_processing().unwrap();
        let settled = t.settle(AttemptOutcome::Failed("again".into()), &policy).unwrap();
        assert_eq!(settled, Settlement::Failed);
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.attempts, 2);
    }

    #[test]
    fn longest_allowed_backoff_is_recorded() {
        let policy = QueueConfig {
            retry_limit: 5,
            backoff_base_ms: 86_400_000,
            backoff_max_ms: 86_400_000,
            ..Default::default()
        };
        let mut t = task();
        t.mark_processing().unwrap();
        let settled = t.settle(AttemptOutcome::Failed("slow".into()), &policy).unwrap();

        assert_eq!(
            settled,
            Settlement::Retry {
                delay: Duration::from_secs(86_400)
            }
        );
        let not_before = t.not_before.unwrap();
        assert!(not_before - t.updated_at == chrono::Duration::days(1));
    }

    #[test]
    fn zero_retry_limit_fails_on_first_error() {
        let mut t = task();
        t.mark_processing().unwrap();
        let settled = t.settle(AttemptOutcome::Failed("boom".into()), &policy(0)).unwrap();
        assert_eq!(settled, Settlement::Failed);
        assert_eq!(t.attempts, 1);
    }

    #[test]
    fn settling_a_task_that_is_not_processing_is_rejected() {
        let mut t = task();
        let err = t.settle(AttemptOutcome::Succeeded, &policy(3)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(task()).unwrap();
        assert_eq!(json["entityId"], "task-42");
        assert_eq!(json["entityType"], "task");
        assert_eq!(json["status"], "queued");
        assert!(json.get("sequence").is_none());
    }
}
