//! Queue services shared by the route handlers.

use std::sync::Arc;

use linkdesk_infra::linking::{
    ConfigError, Dispatcher, DispatcherHandle, DispatcherMonitor, LinkingOperation, QueueConfig,
    QueueLimits, QueueSettings, TaskQueue,
};

use crate::config::ServerConfig;

#[derive(Debug, Clone)]
pub struct AppServices {
    pub queue: Arc<TaskQueue>,
    pub settings: QueueSettings,
    pub monitor: DispatcherMonitor,
}

/// Build the queue and its live settings, and start the background dispatcher.
///
/// The returned handle must be kept alive; dropping it stops the dispatcher.
pub fn start(
    config: &ServerConfig,
    linker: Arc<dyn LinkingOperation>,
) -> Result<(Arc<AppServices>, DispatcherHandle), ConfigError> {
    start_with(config.queue.clone(), config.limits, linker)
}

pub fn start_with(
    queue_config: QueueConfig,
    limits: QueueLimits,
    linker: Arc<dyn LinkingOperation>,
) -> Result<(Arc<AppServices>, DispatcherHandle), ConfigError> {
    let queue = Arc::new(TaskQueue::new(limits));
    let settings = QueueSettings::new(queue_config)?;
    let handle = Dispatcher::new(queue.clone(), settings.clone(), linker).spawn();

    let services = AppServices {
        queue,
        settings,
        monitor: handle.monitor(),
    };
    Ok((Arc::new(services), handle))
}
