//! Service host driven by the thread that created it.
//!
//! Unlike a managed host, nothing runs unless the owner calls [`poll`] or
//! [`update`]. Jobs posted from other threads wait in the queue until then,
//! so a host embedded in an application's main loop stays on that loop's
//! thread.
//!
//! [`poll`]: CooperativeThreadHost::poll
//! [`update`]: CooperativeThreadHost::update

use std::sync::Arc;

use threadhost_core::ProcessResult;

use crate::config::HostConfig;
use crate::dispatch::{self, JobQueue, WakeCallback, WakeSignal};
use crate::error::{HostError, ServiceFailure};
use crate::host::ServiceHost;
use crate::proxy::ServiceHostProxy;

/// A [`ServiceHost`] pumped manually by its owning thread.
///
/// Calls made through [`Self::service_host`] from the owning thread itself
/// only complete while that thread keeps polling.
///
/// Dropping the host does not shut its services down: `shutdown` is never
/// called on services still running at that point, and only a warning is
/// logged. Call [`Self::shutdown`] first.
pub struct CooperativeThreadHost {
    config: HostConfig,
    host: Option<Arc<ServiceHost>>,
    proxy: Arc<ServiceHostProxy>,
    queue: JobQueue,
    signal: Arc<WakeSignal>,
}

impl CooperativeThreadHost {
    /// Creates the host on the calling thread, which becomes its owner.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        let (dispatcher, queue) = dispatch::channel(&config.name);
        let host = Arc::new(ServiceHost::new(config.name.clone(), dispatcher.clone()));
        host.shutdown_controller().set_running();
        let proxy = Arc::new(ServiceHostProxy::new(&host, dispatcher));
        let signal = queue.signal();
        Self {
            config,
            host: Some(host),
            proxy,
            queue,
            signal,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Proxy usable from any thread.
    #[must_use]
    pub fn service_host(&self) -> Arc<ServiceHostProxy> {
        Arc::clone(&self.proxy)
    }

    /// Direct access for code running on the owning thread.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::TargetDisposed`] after [`Self::shutdown`].
    pub fn host(&self) -> Result<&Arc<ServiceHost>, HostError> {
        self.host.as_ref().ok_or(HostError::TargetDisposed)
    }

    /// Installs a callback run on the posting thread whenever a job is
    /// queued, so an external event loop can schedule a poll.
    pub fn set_wake_callback(&self, callback: Option<WakeCallback>) {
        self.signal.set_callback(callback);
    }

    /// Number of jobs waiting for the next poll.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Runs every job queued so far, in post order. Jobs posted while these
    /// run wait for the next poll. Returns how many jobs ran.
    pub async fn poll(&mut self) -> usize {
        let jobs = self.queue.drain_ready();
        let count = jobs.len();
        for job in jobs {
            job().await;
        }
        count
    }

    /// Polls, then processes running services.
    ///
    /// The result forbids sleeping when jobs are already waiting, so the
    /// caller comes straight back.
    pub async fn update(&mut self) -> ProcessResult {
        self.poll().await;
        let Some(host) = &self.host else {
            return ProcessResult::Quit;
        };
        let result = host.process_services();
        result.allow_sleep(self.queue.pending() == 0)
    }

    /// Resolves once a job has been posted since the last wait.
    pub async fn wait_for_work(&self) {
        self.signal.notified().await;
    }

    #[must_use]
    pub fn quit_requested(&self) -> bool {
        self.host
            .as_ref()
            .map_or(true, |host| host.shutdown_controller().is_shutdown_requested())
    }

    /// Shuts down every remaining service, lowest priority first, then
    /// disposes the host. Jobs still queued are dropped and their callers
    /// observe [`HostError::TargetDisposed`].
    pub async fn shutdown(&mut self) -> Vec<ServiceFailure> {
        let Some(host) = self.host.take() else {
            return Vec::new();
        };
        let controller = host.shutdown_controller();
        controller.request_shutdown();
        self.queue.close();
        let failures = host.shutdown_all().await;
        controller.set_stopped();
        drop(self.queue.drain_ready());
        tracing::info!(host = %self.config.name, failures = failures.len(), "cooperative host stopped");
        failures
    }
}

impl Drop for CooperativeThreadHost {
    fn drop(&mut self) {
        if let Some(host) = &self.host {
            let remaining = host.service_count();
            if remaining > 0 {
                tracing::warn!(
                    host = %self.config.name,
                    remaining,
                    "cooperative host dropped with running services"
                );
            }
        }
    }
}

impl std::fmt::Debug for CooperativeThreadHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeThreadHost")
            .field("name", &self.config.name)
            .field("pending", &self.queue.pending())
            .finish_non_exhaustive()
    }
}
