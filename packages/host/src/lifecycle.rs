//! Ordered startup and shutdown of every registered service.
//!
//! The manager owns the cooperative main-group host and one managed thread
//! host per other thread group. Startup walks priorities from high to low
//! and, within a priority, thread groups in ascending id order. Shutdown
//! walks the started groups in exactly the reverse order.
//!
//! While waiting on another thread, the manager keeps polling the main host,
//! so services on managed threads may call into main-group services during
//! their own init or shutdown.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use threadhost_core::{ProcessResult, ServiceLaunchPriority, ServiceThreadGroupId, StartServiceRecord};
use tokio_util::sync::CancellationToken;

use crate::config::{HostConfig, LifecycleConfig};
use crate::cooperative::CooperativeThreadHost;
use crate::error::{AggregateError, FailurePhase, HostError, LifecycleError, ServiceFailure};
use crate::host::StartReport;
use crate::managed::ManagedThreadHost;
use crate::proxy::{ServiceHostProxy, ThreadSafeServiceHost};
use crate::registry::ServiceRegistrationRecord;

type StartKey = (Reverse<ServiceLaunchPriority>, ServiceThreadGroupId);

/// Awaits `fut` while running jobs posted to the main host.
async fn drive<F: Future>(main: &mut CooperativeThreadHost, fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    loop {
        main.poll().await;
        tokio::select! {
            biased;
            out = &mut fut => return out,
            () = main.wait_for_work() => {}
        }
    }
}

fn host_failure(host: &str, phase: FailurePhase, err: HostError) -> ServiceFailure {
    ServiceFailure::new(host, phase, anyhow::Error::new(err))
}

/// Starts and stops every registered service across the main host and the
/// thread hosts.
///
/// Dropping the manager stops the thread hosts, which shut their own
/// services down, but main-group services are not shut down: call
/// [`Self::shutdown_services`] before dropping.
pub struct LifecycleManager {
    config: LifecycleConfig,
    registrations: Vec<ServiceRegistrationRecord>,
    main: CooperativeThreadHost,
    threads: BTreeMap<ServiceThreadGroupId, ManagedThreadHost>,
    /// Groups that started successfully, in start order.
    started: Vec<(ServiceLaunchPriority, ServiceThreadGroupId)>,
    cancel: CancellationToken,
    start_attempted: bool,
}

impl LifecycleManager {
    /// Creates the main host on the calling thread. Nothing starts until
    /// [`Self::start_services`].
    ///
    /// The calling thread becomes the owner of every main-group service.
    /// The manager must keep being driven from that thread: after moving it
    /// to another thread (or polling it from a multi-threaded runtime whose
    /// task migrates), main-group lookups fail with
    /// [`DiscoveryError::WrongThread`](threadhost_core::DiscoveryError::WrongThread).
    #[must_use]
    pub fn new(config: LifecycleConfig, registrations: Vec<ServiceRegistrationRecord>) -> Self {
        let main = CooperativeThreadHost::new(config.host.clone());
        Self {
            config,
            registrations,
            main,
            threads: BTreeMap::new(),
            started: Vec::new(),
            cancel: CancellationToken::new(),
            start_attempted: false,
        }
    }

    /// Starts every registered service.
    ///
    /// Thread hosts for all non-main groups are started first. Groups are
    /// then started by descending priority, then ascending thread group.
    /// On the first failing group, every group started so far is shut down
    /// in reverse order and the thread hosts are stopped.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyStarted`] on a second call
    /// - [`LifecycleError::Host`] if a thread host cannot be started
    /// - [`LifecycleError::StartFailed`] with every create, init, and rollback failure
    pub async fn start_services(&mut self) -> Result<(), LifecycleError> {
        if self.start_attempted {
            return Err(LifecycleError::AlreadyStarted);
        }
        self.start_attempted = true;

        let mut plan: BTreeMap<StartKey, Vec<StartServiceRecord>> = BTreeMap::new();
        for registration in std::mem::take(&mut self.registrations) {
            let key = (Reverse(registration.priority), registration.thread_group);
            plan.entry(key)
                .or_default()
                .push(registration.into_start_record());
        }

        for &(_, group) in plan.keys() {
            if group.is_main() || self.threads.contains_key(&group) {
                continue;
            }
            let mut host = ManagedThreadHost::new(HostConfig {
                name: format!("{}-{group}", self.config.thread_name_prefix),
                ..self.config.host.clone()
            });
            if let Err(err) = host.start(Some(&self.cancel)).await {
                tracing::error!(%group, error = %err, "failed to start thread host");
                self.stop_threads().await;
                return Err(err.into());
            }
            self.threads.insert(group, host);
        }

        for ((Reverse(priority), group), records) in plan {
            tracing::info!(%priority, %group, services = records.len(), "starting service group");
            let mut failures = match self.start_group(priority, group, records).await {
                Ok(report) if report.is_success() => {
                    self.started.push((priority, group));
                    continue;
                }
                Ok(report) => report.failures,
                Err(err) => vec![host_failure(&self.host_name(group), FailurePhase::Create, err)],
            };

            tracing::error!(%priority, %group, "service group failed to start, rolling back");
            let mut rollback = self.shutdown_started().await;
            for failure in &mut rollback {
                failure.phase = FailurePhase::Rollback;
            }
            failures.extend(rollback);
            self.stop_threads().await;
            return Err(LifecycleError::StartFailed(AggregateError::new(
                format!("failed to start services at priority {priority} on thread group {group}"),
                failures,
            )));
        }

        tracing::info!(groups = self.started.len(), threads = self.threads.len(), "all services started");
        Ok(())
    }

    /// Shuts down every started group, lowest priority first, then stops the
    /// thread hosts and disposes the main host. Failures are collected and
    /// never stop the sweep.
    pub async fn shutdown_services(&mut self) -> Vec<ServiceFailure> {
        let mut failures = self.shutdown_started().await;
        self.stop_threads().await;
        failures.extend(self.main.shutdown().await);
        if !failures.is_empty() {
            tracing::warn!(failures = failures.len(), "services failed during shutdown");
        }
        failures
    }

    /// Runs queued jobs and processes main-group services. Call this from
    /// the application's loop and sleep for at most the returned limit.
    pub async fn update(&mut self) -> ProcessResult {
        let result = self.main.update().await;
        if self.threads_quit() {
            return ProcessResult::Quit;
        }
        result
    }

    /// Runs jobs queued for the main host without processing services.
    pub async fn poll(&mut self) -> usize {
        self.main.poll().await
    }

    /// Returns `true` if the main host or any thread host has asked to quit.
    #[must_use]
    pub fn quit_requested(&self) -> bool {
        self.main.quit_requested() || self.threads_quit()
    }

    #[must_use]
    pub fn main_host(&self) -> &CooperativeThreadHost {
        &self.main
    }

    pub fn main_host_mut(&mut self) -> &mut CooperativeThreadHost {
        &mut self.main
    }

    /// Proxy for the host running `group`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotStarted`] if no thread host runs `group`.
    pub fn service_host(&self, group: ServiceThreadGroupId) -> Result<Arc<ServiceHostProxy>, HostError> {
        if group.is_main() {
            return Ok(self.main.service_host());
        }
        self.threads
            .get(&group)
            .ok_or(HostError::NotStarted)?
            .service_host()
    }

    /// Cancelling this token stops every thread host.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn host_name(&self, group: ServiceThreadGroupId) -> String {
        if group.is_main() {
            self.main.name().to_string()
        } else {
            format!("{}-{group}", self.config.thread_name_prefix)
        }
    }

    fn threads_quit(&self) -> bool {
        self.threads.values().any(|host| !host.is_running())
    }

    async fn start_group(
        &mut self,
        priority: ServiceLaunchPriority,
        group: ServiceThreadGroupId,
        records: Vec<StartServiceRecord>,
    ) -> Result<StartReport, HostError> {
        if group.is_main() {
            let host = Arc::clone(self.main.host()?);
            return Ok(host.try_start_services(records, priority).await?);
        }
        let proxy = self.service_host(group)?;
        drive(&mut self.main, proxy.try_start_services(records, priority)).await
    }

    async fn shutdown_group(
        &mut self,
        priority: ServiceLaunchPriority,
        group: ServiceThreadGroupId,
    ) -> Vec<ServiceFailure> {
        if group.is_main() {
            return match self.main.host() {
                Ok(host) => Arc::clone(host).try_shutdown_services(priority).await,
                Err(_) => Vec::new(),
            };
        }
        let Ok(proxy) = self.service_host(group) else {
            return Vec::new();
        };
        match drive(&mut self.main, proxy.try_shutdown_services(priority)).await {
            Ok(failures) => failures,
            Err(err) => {
                // A host that already stopped shut its services down itself.
                tracing::warn!(%priority, %group, error = %err, "thread host gone before shutdown");
                Vec::new()
            }
        }
    }

    async fn shutdown_started(&mut self) -> Vec<ServiceFailure> {
        let mut failures = Vec::new();
        while let Some((priority, group)) = self.started.pop() {
            tracing::info!(%priority, %group, "shutting down service group");
            failures.extend(self.shutdown_group(priority, group).await);
        }
        failures
    }

    async fn stop_threads(&mut self) {
        for (group, mut host) in std::mem::take(&mut self.threads) {
            if let Err(err) = drive(&mut self.main, host.shutdown()).await {
                tracing::error!(%group, error = %err, "thread host did not stop cleanly");
            }
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("pending", &self.registrations.len())
            .field("started", &self.started)
            .field("threads", &self.threads.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
