//! In-memory priority queue holding linking tasks.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use linkdesk_core::{DomainError, EntityType, TaskId};

use super::config::QueueConfig;
use super::types::{AttemptOutcome, QueuedTask, Settlement, TaskStatus};

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("queue is at capacity ({0} live tasks)")]
    Full(usize),
    #[error("queue is closed")]
    Closed,
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Sizing limits fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum number of non-terminal tasks
    pub capacity: usize,
    /// How long terminal tasks stay queryable before they are purged
    pub retention: Duration,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention: Duration::from_secs(3_600),
        }
    }
}

/// Per-status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Heap entry for a dequeue-eligible task.
///
/// Max-heap order: higher priority first, then lower sequence (FIFO).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    sequence: u64,
    id: TaskId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            order => order,
        }
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap entry for a task waiting out its backoff. Earliest `due` on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelayedEntry {
    due: Instant,
    sequence: u64,
    id: TaskId,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    records: HashMap<TaskId, QueuedTask>,
    /// May hold stale entries (task no longer `Queued`); skipped on pop.
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<DelayedEntry>,
    /// Terminal tasks in settle order, for retention purging.
    finished: VecDeque<(Instant, TaskId)>,
    next_sequence: u64,
    closed: bool,
}

impl QueueState {
    fn live(&self) -> usize {
        self.records.len() - self.finished.len()
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek().copied() {
            if entry.due > now {
                break;
            }
            self.delayed.pop();
            if let Some(task) = self.records.get_mut(&entry.id) {
                task.requeue();
                if task.status == TaskStatus::Queued {
                    self.ready.push(ReadyEntry {
                        priority: task.priority,
                        sequence: task.sequence,
                        id: task.id,
                    });
                }
            }
        }
    }

    fn is_eligible(&self, entry: &ReadyEntry) -> bool {
        self.records
            .get(&entry.id)
            .is_some_and(|t| t.status == TaskStatus::Queued)
    }

    /// Drop stale entries so that the top of `ready` (if any) is eligible.
    fn discard_stale(&mut self) {
        while let Some(top) = self.ready.peek() {
            if self.is_eligible(top) {
                break;
            }
            self.ready.pop();
        }
    }

    fn purge_finished(&mut self, now: Instant, retention: Duration) {
        while let Some((settled_at, id)) = self.finished.front().copied() {
            if now.saturating_duration_since(settled_at) < retention {
                break;
            }
            self.finished.pop_front();
            self.records.remove(&id);
        }
    }
}

/// Priority-ordered, concurrency-safe holding area for linking tasks.
///
/// Dequeue order is highest `priority` first, ties broken by enqueue order.
/// Retried tasks keep their original enqueue position. All mutations happen
/// under one mutex; a [`Notify`] signals arrivals to a suspended dispatcher.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
    limits: QueueLimits,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(QueueLimits::default())
    }
}

impl TaskQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            limits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No code path panics while holding the lock, so the state is intact.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new task and return its id. Identical entities are not
    /// deduplicated: every call yields a fresh task.
    pub fn enqueue(
        &self,
        entity_id: impl Into<String>,
        entity_type: EntityType,
        priority: i32,
    ) -> Result<TaskId, QueueError> {
        let task = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.purge_finished(Instant::now(), self.limits.retention);
            if state.live() >= self.limits.capacity {
                return Err(QueueError::Full(self.limits.capacity));
            }

            let sequence = state.next_sequence;
            let task = QueuedTask::new(entity_id.into(), entity_type, priority, sequence)?;
            state.next_sequence += 1;
            state.ready.push(ReadyEntry {
                priority,
                sequence,
                id: task.id,
            });
            state.records.insert(task.id, task.clone());
            task
        };

        self.arrivals.notify_one();
        info!(
            task_id = %task.id,
            entity_id = %task.entity_id,
            entity_type = %task.entity_type,
            priority = task.priority,
            "linking task enqueued"
        );
        Ok(task.id)
    }

    /// The task that [`claim_next`](Self::claim_next) would return, without claiming it.
    pub fn peek_next(&self) -> Option<QueuedTask> {
        let mut state = self.lock();
        state.promote_due(Instant::now());
        state.discard_stale();
        let top = state.ready.peek().copied()?;
        state.records.get(&top.id).cloned()
    }

    /// Atomically take the next eligible task and move it to `Processing`.
    pub fn claim_next(&self) -> Option<QueuedTask> {
        let mut state = self.lock();
        state.promote_due(Instant::now());
        state.discard_stale();
        let top = state.ready.pop()?;
        let task = state.records.get_mut(&top.id)?;
        // Eligibility was checked under the same lock.
        task.mark_processing().ok()?;
        Some(task.clone())
    }

    /// Move a specific `Queued` task to `Processing`.
    pub fn mark_processing(&self, id: TaskId) -> Result<QueuedTask, QueueError> {
        let mut state = self.lock();
        let task = state.records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        task.mark_processing()?;
        Ok(task.clone())
    }

    /// Settle the in-flight attempt of `id` under `policy`.
    pub fn mark_result(
        &self,
        id: TaskId,
        outcome: AttemptOutcome,
        policy: &QueueConfig,
    ) -> Result<QueuedTask, QueueError> {
        let (task, settlement) = {
            let mut state = self.lock();
            let now = Instant::now();
            let task = state.records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            let settlement = task.settle(outcome, policy)?;
            let task = task.clone();

            match settlement {
                Settlement::Retry { delay } => state.delayed.push(DelayedEntry {
                    due: now + delay,
                    sequence: task.sequence,
                    id,
                }),
                Settlement::Succeeded | Settlement::Failed => {
                    state.finished.push_back((now, id));
                    state.purge_finished(now, self.limits.retention);
                }
            }
            (task, settlement)
        };

        if let Settlement::Retry { delay } = settlement {
            // Wake the dispatcher so it can re-arm its timer for the new due time.
            self.arrivals.notify_one();
            debug!(
                task_id = %id,
                attempt = task.attempts,
                delay_ms = delay.as_millis() as u64,
                "linking task scheduled for retry"
            );
        }
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Option<QueuedTask> {
        self.lock().records.get(&id).cloned()
    }

    /// When the earliest backing-off task becomes eligible again.
    pub fn next_due(&self) -> Option<Instant> {
        self.lock().delayed.peek().map(|e| e.due)
    }

    pub fn stats(&self) -> QueueStats {
        let mut state = self.lock();
        state.purge_finished(Instant::now(), self.limits.retention);

        let mut stats = QueueStats::default();
        for task in state.records.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Retrying => stats.retrying += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Refuse further enqueues. Already recorded tasks are kept.
    pub fn close(&self) {
        self.lock().closed = true;
        self.arrivals.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves when a task arrives (or a retry is scheduled) after the last wake-up.
    pub(crate) async fn arrived(&self) {
        self.arrivals.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linking::config::QueueConfigPatch;
    use proptest::prelude::*;

    fn policy(retry_limit: u32, backoff_ms: u64) -> QueueConfig {
        QueueConfig {
            retry_limit,
            backoff_base_ms: backoff_ms,
            backoff_max_ms: backoff_ms.max(1) * 100,
            ..Default::default()
        }
    }

    #[test]
    fn enqueue_returns_unique_ids() {
        let queue = TaskQueue::default();
        let mut ids = std::collections::HashSet::new();
        for i in 0..500 {
            let id = queue.enqueue(format!("t{i}"), EntityType::Task, 1).unwrap();
            assert!(ids.insert(id));
        }
    }

    #[test]
    fn duplicate_entities_are_not_deduplicated() {
        let queue = TaskQueue::default();
        let a = queue.enqueue("acct-1", EntityType::Account, 1).unwrap();
        let b = queue.enqueue("acct-1", EntityType::Account, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(queue.stats().queued, 2);
    }

    #[test]
    fn higher_priority_first_then_fifo() {
        let queue = TaskQueue::default();
        let first_low = queue.enqueue("a", EntityType::Task, 1).unwrap();
        let high = queue.enqueue("b", EntityType::Task, 5).unwrap();
        let second_low = queue.enqueue("c", EntityType::Task, 1).unwrap();

        assert_eq!(queue.peek_next().unwrap().id, high);
        assert_eq!(queue.claim_next().unwrap().id, high);
        assert_eq!(queue.claim_next().unwrap().id, first_low);
        assert_eq!(queue.claim_next().unwrap().id, second_low);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn claimed_task_is_processing_and_not_claimable_twice() {
        let queue = TaskQueue::default();
        let id = queue.enqueue("biz-9", EntityType::Business, 1).unwrap();

        let claimed = queue.claim_next().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        assert!(queue.claim_next().is_none());
        assert!(matches!(queue.mark_processing(id), Err(QueueError::Domain(_))));
    }

    #[test]
    fn mark_processing_by_id_skips_heap_entry() {
        let queue = TaskQueue::default();
        let a = queue.enqueue("a", EntityType::Task, 9).unwrap();
        let b = queue.enqueue("b", EntityType::Task, 1).unwrap();

        queue.mark_processing(a).unwrap();
        assert_eq!(queue.peek_next().unwrap().id, b);
        assert_eq!(queue.claim_next().unwrap().id, b);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let queue = TaskQueue::default();
        let missing = TaskId::new();
        assert!(matches!(queue.mark_processing(missing), Err(QueueError::NotFound(_))));
        assert!(matches!(
            queue.mark_result(missing, AttemptOutcome::Succeeded, &policy(1, 0)),
            Err(QueueError::NotFound(_))
        ));
        assert!(queue.get(missing).is_none());
    }

    #[test]
    fn retry_is_not_eligible_until_due() {
        let queue = TaskQueue::default();
        let id = queue.enqueue("char-7", EntityType::Character, 1).unwrap();
        queue.claim_next().unwrap();

        let settled = queue
            .mark_result(id, AttemptOutcome::Failed("locked".into()), &policy(2, 60_000))
            .unwrap();
        assert_eq!(settled.status, TaskStatus::Retrying);
        assert!(queue.next_due().is_some());
        assert!(queue.peek_next().is_none());
        assert!(queue.claim_next().is_none());
        assert_eq!(queue.stats().retrying, 1);
    }

    #[test]
    fn longest_backoff_still_schedules_the_retry() {
        let queue = TaskQueue::default();
        let id = queue.enqueue("acct-3", EntityType::Account, 1).unwrap();
        queue.claim_next().unwrap();

        let longest = QueueConfig::default()
            .merged(&QueueConfigPatch {
                backoff_base_ms: Some(86_400_000),
                backoff_max_ms: Some(86_400_000),
                ..Default::default()
            })
            .unwrap();
        let before = Instant::now();
        let settled = queue
            .mark_result(id, AttemptOutcome::Failed("locked".into()), &longest)
            .unwrap();

        assert_eq!(settled.status, TaskStatus::Retrying);
        assert!(settled.not_before.is_some());
        let due = queue.next_due().unwrap();
        assert!(due >= before + Duration::from_secs(86_400));
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn zero_backoff_retry_is_immediately_eligible() {
        let queue = TaskQueue::default();
        let id = queue.enqueue("char-7", EntityType::Character, 1).unwrap();
        queue.claim_next().unwrap();
        queue
            .mark_result(id, AttemptOutcome::Failed("locked".into()), &policy(2, 0))
            .unwrap();

        let again = queue.claim_next().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn always_failing_task_fails_after_retry_limit_plus_one() {
        let queue = TaskQueue::default();
        let policy = policy(3, 0);
        let id = queue.enqueue("acct-3", EntityType::Account, 1).unwrap();

        let mut attempts = 0;
        while let Some(task) = queue.claim_next() {
            attempts += 1;
            assert!(task.attempts <= policy.retry_limit + 1);
            queue
                .mark_result(task.id, AttemptOutcome::Failed("nope".into()), &policy)
                .unwrap();
        }

        let task = queue.get(id).unwrap();
        assert_eq!(attempts, 4);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 4);
        assert_eq!(task.last_error.as_deref(), Some("nope"));
    }

    #[test]
    fn retried_task_keeps_its_fifo_position() {
        let queue = TaskQueue::default();
        let early = queue.enqueue("early", EntityType::Task, 1).unwrap();
        queue.claim_next().unwrap();
        let late = queue.enqueue("late", EntityType::Task, 1).unwrap();
        queue
            .mark_result(early, AttemptOutcome::Failed("x".into()), &policy(1, 0))
            .unwrap();

        assert_eq!(queue.claim_next().unwrap().id, early);
        assert_eq!(queue.claim_next().unwrap().id, late);
    }

    #[test]
    fn capacity_counts_only_live_tasks() {
        let queue = TaskQueue::new(QueueLimits {
            capacity: 1,
            retention: Duration::from_secs(60),
        });
        let id = queue.enqueue("a", EntityType::Task, 1).unwrap();
        assert!(matches!(
            queue.enqueue("b", EntityType::Task, 1),
            Err(QueueError::Full(1))
        ));

        queue.claim_next().unwrap();
        queue.mark_result(id, AttemptOutcome::Succeeded, &policy(0, 0)).unwrap();
        queue.enqueue("b", EntityType::Task, 1).unwrap();
        // The settled task is still retained for status queries.
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Succeeded);
    }

    #[test]
    fn terminal_tasks_are_purged_after_retention() {
        let queue = TaskQueue::new(QueueLimits {
            capacity: 10,
            retention: Duration::ZERO,
        });
        let id = queue.enqueue("a", EntityType::Task, 1).unwrap();
        queue.claim_next().unwrap();
        queue.mark_result(id, AttemptOutcome::Succeeded, &policy(0, 0)).unwrap();

        assert!(queue.get(id).is_none());
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn closed_queue_rejects_enqueue() {
        let queue = TaskQueue::default();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue("a", EntityType::Task, 1),
            Err(QueueError::Closed)
        ));
    }

    #[test]
    fn empty_entity_id_is_a_validation_error() {
        let queue = TaskQueue::default();
        assert!(matches!(
            queue.enqueue("", EntityType::Task, 1),
            Err(QueueError::Domain(DomainError::Validation(_)))
        ));
    }

    proptest! {
        /// Dequeue order is priority-descending, FIFO within a priority.
        #[test]
        fn dequeue_order_is_priority_then_fifo(priorities in prop::collection::vec(-5i32..5, 1..60)) {
            let queue = TaskQueue::default();
            let mut expected: Vec<(i32, usize, TaskId)> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| (*p, i, queue.enqueue(format!("e{i}"), EntityType::Task, *p).unwrap()))
                .collect();
            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let dequeued: Vec<TaskId> = std::iter::from_fn(|| queue.claim_next().map(|t| t.id)).collect();
            let expected: Vec<TaskId> = expected.into_iter().map(|(_, _, id)| id).collect();
            prop_assert_eq!(dequeued, expected);
        }
    }
}
