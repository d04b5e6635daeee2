//! Queue runtime policy and atomic reconfiguration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Runtime policy consumed by the dispatcher.
///
/// Always handled as an immutable snapshot (`Arc<QueueConfig>`): a worker keeps
/// the snapshot it was launched with for the whole attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Upper bound on concurrently running linking attempts (>= 1)
    pub max_concurrency: usize,
    /// Retries after the first attempt; a task makes at most `retry_limit + 1` attempts
    pub retry_limit: u32,
    /// Backoff before the first retry
    pub backoff_base_ms: u64,
    /// Backoff cap (>= `backoff_base_ms`)
    pub backoff_max_ms: u64,
    /// When false, no new attempts are started
    pub enabled: bool,
    /// Per-attempt deadline for the linking operation (>= 1)
    pub attempt_timeout_ms: u64,
    /// Bumped on every applied reconfiguration
    pub version: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry_limit: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            enabled: true,
            attempt_timeout_ms: 30_000,
            version: 0,
        }
    }
}

/// Partial update. Omitted fields keep their current value; unknown fields
/// are ignored on deserialization.
///
/// Numbers are signed so that out-of-range input (e.g. a negative
/// concurrency) is reported as a validation error instead of a decode error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfigPatch {
    pub max_concurrency: Option<i64>,
    pub retry_limit: Option<i64>,
    pub backoff_base_ms: Option<i64>,
    pub backoff_max_ms: Option<i64>,
    pub enabled: Option<bool>,
    pub attempt_timeout_ms: Option<i64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be {expected} (got {value})")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: i64,
    },

    #[error("backoffMaxMs ({max}) must be >= backoffBaseMs ({base})")]
    BackoffInverted { base: u64, max: u64 },
}

/// Upper bound for backoff delays and the attempt timeout: one day.
const MAX_DELAY_MS: u64 = 86_400_000;

fn in_range<T: TryFrom<i64>>(
    field: &'static str,
    expected: &'static str,
    value: i64,
    min: i64,
) -> Result<T, ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange {
            field,
            expected,
            value,
        });
    }
    T::try_from(value).map_err(|_| ConfigError::OutOfRange {
        field,
        expected,
        value,
    })
}

impl QueueConfig {
    /// Check the cross-field invariants of a complete config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "maxConcurrency",
                expected: "> 0",
                value: 0,
            });
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "attemptTimeoutMs",
                expected: "> 0",
                value: 0,
            });
        }
        for (field, value) in [
            ("backoffBaseMs", self.backoff_base_ms),
            ("backoffMaxMs", self.backoff_max_ms),
            ("attemptTimeoutMs", self.attempt_timeout_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(ConfigError::OutOfRange {
                    field,
                    expected: "<= 86400000 (one day)",
                    value: i64::try_from(value).unwrap_or(i64::MAX),
                });
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::BackoffInverted {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        Ok(())
    }

    /// Apply `patch` on top of `self`, validating the result as a whole.
    ///
    /// The returned config keeps `self.version`; bumping it is the caller's job.
    pub fn merged(&self, patch: &QueueConfigPatch) -> Result<QueueConfig, ConfigError> {
        let mut next = self.clone();

        if let Some(v) = patch.max_concurrency {
            next.max_concurrency = in_range("maxConcurrency", "> 0", v, 1)?;
        }
        if let Some(v) = patch.retry_limit {
            next.retry_limit = in_range("retryLimit", ">= 0", v, 0)?;
        }
        if let Some(v) = patch.backoff_base_ms {
            next.backoff_base_ms = in_range("backoffBaseMs", ">= 0", v, 0)?;
        }
        if let Some(v) = patch.backoff_max_ms {
            next.backoff_max_ms = in_range("backoffMaxMs", ">= 0", v, 0)?;
        }
        if let Some(v) = patch.enabled {
            next.enabled = v;
        }
        if let Some(v) = patch.attempt_timeout_ms {
            next.attempt_timeout_ms = in_range("attemptTimeoutMs", "> 0", v, 1)?;
        }

        next.validate()?;
        Ok(next)
    }

    /// Whether a task that has made `attempts` attempts may be retried.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts <= self.retry_limit
    }

    /// Delay before the retry that follows attempt number `attempts` (1-indexed):
    /// `min(base * 2^(attempts - 1), max)`.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempts - 1);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Owner of the live [`QueueConfig`].
///
/// Readers take whole snapshots; writers go through [`reconfigure`](Self::reconfigure),
/// which merges, validates and swaps under the channel's lock, so concurrent
/// reconfigurations are serialized and never publish an invalid config.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    tx: Arc<watch::Sender<Arc<QueueConfig>>>,
}

impl QueueSettings {
    pub fn new(initial: QueueConfig) -> Result<Self, ConfigError> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self { tx: Arc::new(tx) })
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<QueueConfig> {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified on every applied change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<QueueConfig>> {
        self.tx.subscribe()
    }

    /// Merge `patch` into the current config. All-or-nothing: on error the
    /// current config is left untouched.
    pub fn reconfigure(&self, patch: &QueueConfigPatch) -> Result<Arc<QueueConfig>, ConfigError> {
        let mut outcome = Ok(self.current());

        self.tx.send_if_modified(|current| match current.merged(patch) {
            Ok(next) if next == **current => {
                outcome = Ok(current.clone());
                false
            }
            Ok(next) => {
                let next = Arc::new(QueueConfig {
                    version: current.version + 1,
                    ..next
                });
                *current = next.clone();
                outcome = Ok(next);
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });

        if let Ok(config) = &outcome {
            info!(
                version = config.version,
                max_concurrency = config.max_concurrency,
                retry_limit = config.retry_limit,
                backoff_base_ms = config.backoff_base_ms,
                backoff_max_ms = config.backoff_max_ms,
                enabled = config.enabled,
                "queue configuration applied"
            );
        }
        outcome
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(QueueConfig::default()));
        Self { tx: Arc::new(tx) }
    }
}
