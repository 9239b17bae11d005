use std::time::Duration;

use threadhost_core::DEFAULT_MAX_SLEEP_LIMIT;

/// Configuration for a single service host.
///
/// Controls the host's diagnostic name, how often services are processed when
/// they impose no sleep limit, and which `tracing` dispatcher the host thread
/// logs through.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Name used for the host thread and its tracing span.
    pub name: String,
    /// Delay between `process()` sweeps when every service reports
    /// `NoSleepLimit`.
    pub idle_process_interval: Duration,
    /// Dispatcher installed as the thread default on managed host threads.
    /// `None` leaves the global dispatcher in effect.
    pub dispatch: Option<tracing::Dispatch>,
}

impl HostConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "service-host".to_string(),
            idle_process_interval: DEFAULT_MAX_SLEEP_LIMIT,
            dispatch: None,
        }
    }
}

/// Configuration for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Template for every host the manager creates. Thread hosts get
    /// `"{thread_name_prefix}-{group}"` as their name.
    pub host: HostConfig,
    pub thread_name_prefix: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::named("main"),
            thread_name_prefix: "service-group".to_string(),
        }
    }
}
