//! Thread-affine container for the services of one thread group.
//!
//! A `ServiceHost` lives on exactly one thread. It creates services from
//! their factories, drives them through init, process, and shutdown, and
//! publishes successfully started priority groups through its
//! [`ManagedThreadServiceProvider`]. Other threads reach it only through a
//! `ServiceHostProxy`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use threadhost_core::{
    DiscoveryError, InterfaceTag, ProcessResult, ServiceControl, ServiceCreateInfo,
    ServiceDiscovery, ServiceFactory, ServiceInstanceInfo, ServiceLaunchPriority, ServiceProvider,
    ServiceProviderProxy, StartServiceRecord,
};

use crate::dispatch::Dispatcher;
use crate::error::{AggregateError, FailurePhase, ProviderError, ServiceFailure};
use crate::provider::ManagedThreadServiceProvider;
use crate::shutdown::ShutdownController;
use crate::state::ServiceState;

// ---------------------------------------------------------------------------
// StartReport
// ---------------------------------------------------------------------------

/// Outcome of starting one priority group.
#[derive(Debug)]
pub struct StartReport {
    pub priority: ServiceLaunchPriority,
    /// Services that are now running, in start order.
    pub started: Vec<String>,
    /// Create, init, and rollback failures. Empty on success.
    pub failures: Vec<ServiceFailure>,
    /// Services that had initialized and were shut down again, in shutdown order.
    pub rolled_back: Vec<String>,
}

impl StartReport {
    fn empty(priority: ServiceLaunchPriority) -> Self {
        Self {
            priority,
            started: Vec::new(),
            failures: Vec::new(),
            rolled_back: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts the report into the started names or an aggregate error.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregateError`] carrying every failure if the group did
    /// not start.
    pub fn into_result(self) -> Result<Vec<String>, AggregateError> {
        if self.failures.is_empty() {
            Ok(self.started)
        } else {
            Err(AggregateError::new(
                format!("service initialization failed at priority {}", self.priority),
                self.failures,
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Hosted services
// ---------------------------------------------------------------------------

struct HostedService {
    name: String,
    control: Arc<dyn ServiceControl>,
    state: Mutex<ServiceState>,
}

impl HostedService {
    fn new(name: String, control: Arc<dyn ServiceControl>) -> Self {
        Self {
            name,
            control,
            state: Mutex::new(ServiceState::Created),
        }
    }

    fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Moves to `next`, returning `false` (and logging) if not allowed.
    fn advance(&self, next: ServiceState) -> bool {
        let mut state = self.state.lock();
        match state.transition(&self.name, next) {
            Ok(next) => {
                *state = next;
                true
            }
            Err(err) => {
                tracing::debug!(service = %self.name, error = %err, "transition skipped");
                false
            }
        }
    }
}

struct HostedGroup {
    priority: ServiceLaunchPriority,
    provider_proxy: Arc<ServiceProviderProxy>,
    services: Vec<Arc<HostedService>>,
}

struct CreatedService {
    info: ServiceCreateInfo,
    instance: ServiceInstanceInfo,
    hosted: Arc<HostedService>,
}

fn create_instance(
    factory: Box<dyn ServiceFactory>,
    info: &ServiceCreateInfo,
) -> anyhow::Result<ServiceInstanceInfo> {
    let Some(&requested) = factory.supported_interfaces().first() else {
        anyhow::bail!("factory reports no supported interfaces");
    };
    let instance = factory.create(requested, info)?;
    if instance.interfaces().is_empty() {
        anyhow::bail!("factory returned an instance without interfaces");
    }
    Ok(instance)
}

/// Shuts `services` down in reverse order, continuing past failures.
/// Returns the failures and the names of the services that were shut down.
async fn shut_down_reverse(
    services: &[Arc<HostedService>],
    phase: FailurePhase,
) -> (Vec<ServiceFailure>, Vec<String>) {
    let mut failures = Vec::new();
    let mut names = Vec::new();
    for hosted in services.iter().rev() {
        // A service that returned Quit is already ShuttingDown.
        if hosted.state() != ServiceState::ShuttingDown && !hosted.advance(ServiceState::ShuttingDown) {
            continue;
        }
        tracing::info!(service = %hosted.name, %phase, "shutting down service");
        if let Err(error) = hosted.control.shutdown().await {
            tracing::error!(service = %hosted.name, %phase, error = %format!("{error:#}"), "service shutdown failed");
            failures.push(ServiceFailure::new(hosted.name.clone(), phase, error));
        }
        hosted.advance(ServiceState::Terminated);
        names.push(hosted.name.clone());
    }
    (failures, names)
}

// ---------------------------------------------------------------------------
// ServiceHost
// ---------------------------------------------------------------------------

/// Owns the services of one thread group. Not meant to be touched from any
/// thread other than the one that created it.
pub struct ServiceHost {
    name: String,
    provider: Arc<ManagedThreadServiceProvider>,
    groups: Mutex<Vec<HostedGroup>>,
    shutdown: ShutdownController,
    dispatcher: Dispatcher,
}

impl ServiceHost {
    /// Creates a host owned by the calling thread. `dispatcher` must feed the
    /// queue that this thread drains.
    #[must_use]
    pub fn new(name: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            name: name.into(),
            provider: Arc::new(ManagedThreadServiceProvider::new()),
            groups: Mutex::new(Vec::new()),
            shutdown: ShutdownController::new(),
            dispatcher,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatcher feeding this host's thread.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<ManagedThreadServiceProvider> {
        &self.provider
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Weak discovery facade over every group running on this host.
    #[must_use]
    pub fn service_provider(&self) -> ServiceProvider {
        let discovery: Arc<dyn ServiceDiscovery> = self.provider.clone();
        ServiceProvider::from_arc(&discovery)
    }

    /// Resolves exactly one running service implementing `T`.
    ///
    /// # Errors
    ///
    /// Any [`DiscoveryError`] from the provider, including
    /// [`DiscoveryError::WrongThread`] off the owner thread.
    pub fn with_service<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, DiscoveryError> {
        let tag = InterfaceTag::of::<T>();
        self.provider
            .get_service(tag)?
            .downcast::<T>()
            .ok_or(DiscoveryError::ServiceCast { tag })
    }

    #[must_use]
    pub fn service_count(&self) -> usize {
        self.provider.service_count()
    }

    /// Name and state of every hosted service, in start order.
    #[must_use]
    pub fn service_states(&self) -> Vec<(String, ServiceState)> {
        self.groups
            .lock()
            .iter()
            .flat_map(|g| g.services.iter().map(|s| (s.name.clone(), s.state())))
            .collect()
    }

    /// Asks the thread running this host to shut down. Returns `false` if a
    /// shutdown had already been requested.
    pub fn request_shutdown(&self) -> bool {
        let first = self.shutdown.request_shutdown();
        if first {
            tracing::info!(host = %self.name, "host shutdown requested");
        }
        first
    }

    /// Creates, initializes, and registers one priority group.
    ///
    /// Every record is created, then every created instance is initialized,
    /// in array order, regardless of earlier failures. If all succeed the
    /// group is registered with the provider. Otherwise the instances that
    /// did initialize are shut down again in reverse order and the
    /// discovery facade handed to them is disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidPriorityOrder`] before creating
    /// anything if `priority` is not lower than every group already running
    /// on this host. Per-service failures are reported in the
    /// [`StartReport`], not as an error.
    pub async fn try_start_services(
        &self,
        records: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> Result<StartReport, ProviderError> {
        if records.is_empty() {
            tracing::warn!(host = %self.name, %priority, "no services to start");
            return Ok(StartReport::empty(priority));
        }
        self.provider.check_next_priority(priority)?;

        let discovery: Arc<dyn ServiceDiscovery> = self.provider.clone();
        let provider_proxy = Arc::new(ServiceProviderProxy::new(discovery));
        let proxy_discovery: Arc<dyn ServiceDiscovery> = provider_proxy.clone();
        let service_provider = ServiceProvider::from_arc(&proxy_discovery);

        let mut failures = Vec::new();
        let mut created = Vec::with_capacity(records.len());
        for StartServiceRecord {
            name,
            factory,
            options,
        } in records
        {
            tracing::info!(service = %name, %priority, "creating service");
            let info = ServiceCreateInfo::new(name.clone(), service_provider.clone(), options);
            match create_instance(factory, &info) {
                Ok(instance) => {
                    let hosted = Arc::new(HostedService::new(name, Arc::clone(instance.control())));
                    created.push(CreatedService {
                        info,
                        instance,
                        hosted,
                    });
                }
                Err(error) => {
                    tracing::error!(service = %name, error = %format!("{error:#}"), "service creation failed");
                    failures.push(ServiceFailure::new(name, FailurePhase::Create, error));
                }
            }
        }

        for service in &created {
            let hosted = &service.hosted;
            tracing::info!(service = %hosted.name, %priority, "initializing service");
            match hosted.control.init(&service.info).await {
                Ok(()) => {
                    hosted.advance(ServiceState::Initialized);
                }
                Err(error) => {
                    tracing::error!(service = %hosted.name, error = %format!("{error:#}"), "service initialization failed");
                    failures.push(ServiceFailure::new(hosted.name.clone(), FailurePhase::Init, error));
                    hosted.advance(ServiceState::Terminated);
                }
            }
        }

        let hosted: Vec<Arc<HostedService>> = created.iter().map(|c| Arc::clone(&c.hosted)).collect();

        if failures.is_empty() {
            let instances = created.into_iter().map(|c| c.instance).collect();
            if let Err(err) = self.provider.register_priority_group(priority, instances) {
                let (rollback_failures, _) = shut_down_reverse(&hosted, FailurePhase::Rollback).await;
                for failure in &rollback_failures {
                    tracing::error!(error = %failure, "rollback after rejected registration failed");
                }
                provider_proxy.clear();
                return Err(err);
            }
            for service in &hosted {
                service.advance(ServiceState::Running);
            }
            let started = hosted.iter().map(|s| s.name.clone()).collect();
            self.groups.lock().push(HostedGroup {
                priority,
                provider_proxy,
                services: hosted,
            });
            tracing::info!(host = %self.name, %priority, "priority group started");
            return Ok(StartReport {
                priority,
                started,
                failures,
                rolled_back: Vec::new(),
            });
        }

        let initialized: Vec<Arc<HostedService>> = hosted
            .into_iter()
            .filter(|s| s.state() == ServiceState::Initialized)
            .collect();
        tracing::warn!(
            host = %self.name,
            %priority,
            failures = failures.len(),
            rollback = initialized.len(),
            "priority group failed to start, rolling back"
        );
        let (rollback_failures, rolled_back) = shut_down_reverse(&initialized, FailurePhase::Rollback).await;
        provider_proxy.clear();
        failures.extend(rollback_failures);

        Ok(StartReport {
            priority,
            started: Vec::new(),
            failures,
            rolled_back,
        })
    }

    /// Unregisters the group at `priority` and shuts its services down in
    /// reverse start order, collecting failures and continuing past them.
    pub async fn try_shutdown_services(&self, priority: ServiceLaunchPriority) -> Vec<ServiceFailure> {
        let group = {
            let mut groups = self.groups.lock();
            groups
                .iter()
                .position(|g| g.priority == priority)
                .map(|index| groups.remove(index))
        };
        self.provider.unregister_priority_group(priority);

        let Some(group) = group else {
            tracing::warn!(host = %self.name, %priority, "no running services at priority");
            return Vec::new();
        };

        tracing::info!(host = %self.name, %priority, services = group.services.len(), "shutting down priority group");
        let (failures, _) = shut_down_reverse(&group.services, FailurePhase::Shutdown).await;
        group.provider_proxy.clear();
        failures
    }

    /// Shuts down every running group, lowest priority first.
    pub async fn shutdown_all(&self) -> Vec<ServiceFailure> {
        let priorities: Vec<ServiceLaunchPriority> =
            self.groups.lock().iter().rev().map(|g| g.priority).collect();
        let mut failures = Vec::new();
        for priority in priorities {
            failures.extend(self.try_shutdown_services(priority).await);
        }
        failures
    }

    /// Calls `process()` on every running service and merges the results.
    ///
    /// A service returning `Quit` is moved to `ShuttingDown`, is not
    /// processed again, and causes a host shutdown request.
    pub fn process_services(&self) -> ProcessResult {
        let running: Vec<Arc<HostedService>> = self
            .groups
            .lock()
            .iter()
            .flat_map(|g| g.services.iter())
            .filter(|s| s.state() == ServiceState::Running)
            .cloned()
            .collect();

        let mut merged = ProcessResult::NoSleepLimit;
        for hosted in running {
            let result = hosted.control.process();
            if result.is_quit() {
                tracing::info!(service = %hosted.name, "service requested quit");
                hosted.advance(ServiceState::ShuttingDown);
                self.request_shutdown();
            }
            merged = merged.merge(result);
        }
        merged
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("name", &self.name)
            .field("state", &self.shutdown.state())
            .field("services", &self.service_count())
            .finish_non_exhaustive()
    }
}
