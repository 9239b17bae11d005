//! `threadhost`: priority-grouped service hosts on managed threads.
//!
//! Services are registered in a [`ServiceRegistry`], then handed to a
//! [`LifecycleManager`] which starts them group by group: highest priority
//! first, each group on its own thread. Every host is owned by exactly one
//! thread; other threads reach it through a [`ServiceHostProxy`] whose calls
//! fail with [`HostError::TargetDisposed`] once the host is gone.

pub mod config;
pub mod cooperative;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod host;
pub mod lifecycle;
pub mod managed;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod shutdown;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::{HostConfig, LifecycleConfig};
pub use cooperative::CooperativeThreadHost;
pub use dispatch::{Dispatcher, Job, JobQueue, WakeCallback};
pub use error::{
    AggregateError, FailurePhase, HostError, LifecycleError, ProviderError, RegistryError,
    ServiceCallError, ServiceFailure,
};
pub use executor::ExecutorContext;
pub use host::{ServiceHost, StartReport};
pub use lifecycle::LifecycleManager;
pub use managed::{ManagedThreadHost, ManagedThreadRecord};
pub use provider::{ManagedThreadServiceProvider, PriorityGroup};
pub use proxy::{ServiceHostProxy, ThreadSafeServiceHost};
pub use registry::{ServiceRegistrationRecord, ServiceRegistry};
pub use shutdown::{HostState, ShutdownController};
pub use state::ServiceState;
