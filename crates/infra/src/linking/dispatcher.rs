//! Dispatcher: bounded worker pool with retry and backoff.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant as StdInstant;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{QueueConfig, QueueSettings};
use super::operation::LinkingOperation;
use super::queue::TaskQueue;
use super::types::{AttemptOutcome, QueuedTask, TaskStatus};

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub attempts_started: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub active: usize,
    pub uptime_secs: u64,
}

/// Read-only view of a dispatcher's statistics. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatcherMonitor {
    stats: Arc<Mutex<DispatcherStats>>,
    started: StdInstant,
}

impl DispatcherMonitor {
    fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(DispatcherStats::default())),
            started: StdInstant::now(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut DispatcherStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    pub fn snapshot(&self) -> DispatcherStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Handle to control a running dispatcher.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also stops
/// the dispatcher, but nothing waits for in-flight attempts.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    monitor: DispatcherMonitor,
    queue: Arc<TaskQueue>,
}

impl DispatcherHandle {
    pub fn monitor(&self) -> DispatcherMonitor {
        self.monitor.clone()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.monitor.snapshot()
    }

    /// Close the queue, stop starting attempts, and wait for active ones to settle.
    pub async fn shutdown(mut self) {
        self.queue.close();
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "linking dispatcher task failed");
            }
        }
    }
}

/// Pulls tasks from a [`TaskQueue`] and runs them through a [`LinkingOperation`],
/// keeping at most `max_concurrency` attempts in flight.
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    settings: QueueSettings,
    linker: Arc<dyn LinkingOperation>,
    monitor: DispatcherMonitor,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        settings: QueueSettings,
        linker: Arc<dyn LinkingOperation>,
    ) -> Self {
        Self {
            queue,
            settings,
            linker,
            monitor: DispatcherMonitor::new(),
        }
    }

    /// Claim and run a single task inline, honouring `enabled`.
    ///
    /// Returns the task as settled, or `None` if nothing was eligible. Bypasses
    /// the dispatch loop's concurrency accounting.
    #[cfg(test)]
    async fn process_next(&self) -> Option<QueuedTask> {
        let config = self.settings.current();
        if !config.enabled {
            return None;
        }
        let task = self.queue.claim_next()?;
        self.attempt(config).run(task).await
    }

    /// Spawn the dispatch loop on the current tokio runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = self.monitor.clone();
        let queue = self.queue.clone();
        let join = tokio::spawn(self.dispatch_loop(shutdown_rx));

        DispatcherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            monitor,
            queue,
        }
    }

    fn attempt(&self, config: Arc<QueueConfig>) -> Attempt {
        Attempt {
            queue: self.queue.clone(),
            linker: self.linker.clone(),
            monitor: self.monitor.clone(),
            config,
        }
    }

    async fn dispatch_loop(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut config_rx = self.settings.subscribe();
        let mut workers: JoinSet<Option<QueuedTask>> = JoinSet::new();
        info!("linking dispatcher started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Re-read on every decision; marks the version as seen.
            let config = config_rx.borrow_and_update().clone();
            let has_room = config.enabled && workers.len() < config.max_concurrency;

            if has_room {
                if let Some(task) = self.queue.claim_next() {
                    debug!(
                        task_id = %task.id,
                        attempt = task.attempts,
                        config_version = config.version,
                        "claimed linking task"
                    );
                    workers.spawn(self.attempt(config).run(task));
                    self.monitor.update(|s| s.active = workers.len());
                    continue;
                }
            }

            let next_due = if has_room { self.queue.next_due() } else { None };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.queue.arrived(), if has_room => {}
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "linking worker aborted");
                    }
                    self.monitor.update(|s| s.active = workers.len());
                }
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {}
            }
        }

        if !workers.is_empty() {
            info!(
                active = workers.len(),
                "waiting for active linking attempts to settle"
            );
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "linking worker aborted");
            }
        }
        self.monitor.update(|s| s.active = 0);
        info!("linking dispatcher stopped");
    }
}

/// One attempt of one task, with the config snapshot it was launched under.
struct Attempt {
    queue: Arc<TaskQueue>,
    linker: Arc<dyn LinkingOperation>,
    monitor: DispatcherMonitor,
    config: Arc<QueueConfig>,
}

impl Attempt {
    async fn run(self, task: QueuedTask) -> Option<QueuedTask> {
        self.monitor.update(|s| s.attempts_started += 1);

        let linker = self.linker.clone();
        let entity_id = task.entity_id.clone();
        let entity_type = task.entity_type;
        // Separate task so a panicking linker is contained and can be aborted on timeout.
        let mut call = tokio::spawn(async move { linker.link(&entity_id, entity_type).await });

        let outcome = match tokio::time::timeout(self.config.attempt_timeout(), &mut call).await {
            Ok(Ok(Ok(()))) => AttemptOutcome::Succeeded,
            Ok(Ok(Err(e))) => AttemptOutcome::Failed(e.to_string()),
            Ok(Err(e)) if e.is_panic() => {
                AttemptOutcome::Failed("linking operation panicked".to_string())
            }
            Ok(Err(_)) => AttemptOutcome::Failed("linking operation was cancelled".to_string()),
            Err(_) => {
                // The call keeps its slot and the task stays claimed until it
                // has actually stopped; a blocking linker ignores abort.
                call.abort();
                let _ = (&mut call).await;
                AttemptOutcome::Failed(format!(
                    "linking operation timed out after {}ms",
                    self.config.attempt_timeout_ms
                ))
            }
        };

        let settled = match self.queue.mark_result(task.id, outcome, &self.config) {
            Ok(settled) => settled,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to record linking outcome");
                return None;
            }
        };

        match settled.status {
            TaskStatus::Succeeded => {
                self.monitor.update(|s| s.succeeded += 1);
                debug!(task_id = %settled.id, attempt = settled.attempts, "linking task succeeded");
            }
            TaskStatus::Retrying => {
                self.monitor.update(|s| s.retried += 1);
                debug!(
                    task_id = %settled.id,
                    attempt = settled.attempts,
                    error = settled.last_error.as_deref().unwrap_or_default(),
                    "linking attempt failed, will retry"
                );
            }
            TaskStatus::Failed => {
                self.monitor.update(|s| s.failed += 1);
                warn!(
                    task_id = %settled.id,
                    entity_id = %settled.entity_id,
                    entity_type = %settled.entity_type,
                    attempts = settled.attempts,
                    error = settled.last_error.as_deref().unwrap_or_default(),
                    "linking task failed permanently"
                );
            }
            TaskStatus::Queued | TaskStatus::Processing => {}
        }

        Some(settled)
    }
}
