//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use linkdesk_auth::Role;
use linkdesk_infra::linking::{ConfigError, QueueConfig, QueueConfigPatch, QueueLimits};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("{key}: {reason} (got {value:?})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("initial queue configuration is invalid: {0}")]
    Queue(#[from] ConfigError),
}

#[derive(Clone)]
pub struct ServerConfig {
    /// HS256 secret for admin credentials. Empty means every admin request is denied.
    pub jwt_secret: String,
    pub admin_role: Role,
    pub bind_addr: SocketAddr,
    pub queue: QueueConfig,
    pub limits: QueueLimits,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("jwt_secret", &"<redacted>")
            .field("admin_role", &self.admin_role)
            .field("bind_addr", &self.bind_addr)
            .field("queue", &self.queue)
            .field("limits", &self.limits)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigLoadError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set; all admin requests will be rejected");
                String::new()
            }
        };

        let admin_role = get("ADMIN_ROLE").map(Role::new).unwrap_or_default();

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigLoadError::Invalid {
                key: "BIND_ADDR",
                value: bind_addr.clone(),
                reason: "expected host:port",
            })?;

        let patch = QueueConfigPatch {
            max_concurrency: int(&get, "QUEUE_MAX_CONCURRENCY")?,
            retry_limit: int(&get, "QUEUE_RETRY_LIMIT")?,
            backoff_base_ms: int(&get, "QUEUE_BACKOFF_BASE_MS")?,
            backoff_max_ms: int(&get, "QUEUE_BACKOFF_MAX_MS")?,
            enabled: flag(&get, "QUEUE_ENABLED")?,
            attempt_timeout_ms: int(&get, "QUEUE_ATTEMPT_TIMEOUT_MS")?,
        };
        let queue = QueueConfig::default().merged(&patch)?;

        let defaults = QueueLimits::default();
        let capacity = match int(&get, "QUEUE_CAPACITY")? {
            Some(v) if v >= 1 => v as usize,
            Some(v) => {
                return Err(ConfigLoadError::Invalid {
                    key: "QUEUE_CAPACITY",
                    value: v.to_string(),
                    reason: "must be >= 1",
                });
            }
            None => defaults.capacity,
        };
        let retention = match int(&get, "QUEUE_RETENTION_SECS")? {
            Some(v) if v >= 0 => Duration::from_secs(v as u64),
            Some(v) => {
                return Err(ConfigLoadError::Invalid {
                    key: "QUEUE_RETENTION_SECS",
                    value: v.to_string(),
                    reason: "must be >= 0",
                });
            }
            None => defaults.retention,
        };

        Ok(Self {
            jwt_secret,
            admin_role,
            bind_addr,
            queue,
            limits: QueueLimits {
                capacity,
                retention,
            },
        })
    }
}

fn int(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<i64>, ConfigLoadError> {
    get(key)
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| ConfigLoadError::Invalid {
                key,
                value: raw,
                reason: "expected an integer",
            })
        })
        .transpose()
}

fn flag(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigLoadError> {
    get(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigLoadError::Invalid {
                key,
                value: raw,
                reason: "expected true or false",
            }),
        })
        .transpose()
}
