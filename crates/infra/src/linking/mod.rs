//! Entity-linking workflow queue.
//!
//! The "safety belt" path for linking that could not complete inline: callers
//! enqueue a task and get an id back immediately; a dispatcher drains the
//! queue in the background.
//!
//! ## Design
//!
//! - Priority-ordered (higher value first), FIFO within a priority
//! - Bounded concurrency, re-read from the live config on every scheduling decision
//! - Retry with exponential backoff; a failing task makes at most `retry_limit + 1` attempts
//! - Runtime policy swapped atomically; in-flight attempts keep their snapshot
//! - Terminal tasks stay queryable for a retention window, then are purged
//!
//! ## Components
//!
//! - `TaskQueue`: holding area and lifecycle owner of every task record
//! - `QueueSettings`: the live `QueueConfig` and its reconfiguration path
//! - `Dispatcher`: worker pool invoking the `LinkingOperation`

pub mod config;
pub mod dispatcher;
pub mod operation;
pub mod queue;
pub mod types;

pub use config::{ConfigError, QueueConfig, QueueConfigPatch, QueueSettings};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherMonitor, DispatcherStats};
pub use operation::{LinkError, LinkingOperation, LoggingLinker};
pub use queue::{QueueError, QueueLimits, QueueStats, TaskQueue};
pub use types::{AttemptOutcome, QueuedTask, Settlement, TaskStatus};
