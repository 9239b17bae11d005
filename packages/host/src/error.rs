//! Error types for registration, hosting, and lifecycle orchestration.
//!
//! Contract violations (`RegistryError`, `ProviderError`) are returned at the
//! call that broke the contract. Per-service runtime failures are captured as
//! [`ServiceFailure`] values and aggregated instead of aborting sibling
//! services. A call through a proxy whose target is gone surfaces as
//! [`HostError::TargetDisposed`].

use std::fmt;

use threadhost_core::{DiscoveryError, InterfaceTag, ServiceLaunchPriority};

use crate::state::ServiceState;

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors returned by `ServiceRegistry` registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid factory for service {name}: {reason}")]
    InvalidFactory { name: String, reason: &'static str },
    #[error("interface {tag} of service {name} is already registered by {existing}")]
    DuplicateRegistration {
        name: String,
        existing: String,
        tag: InterfaceTag,
    },
    #[error("cannot register service {name}: registry has already been extracted")]
    RegistryExtracted { name: String },
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors returned when registering a priority group with a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("priority group {priority} contains no services")]
    EmptyPriorityGroup { priority: ServiceLaunchPriority },
    #[error("priority {priority} must be lower than the last registered priority {last}")]
    InvalidPriorityOrder {
        priority: ServiceLaunchPriority,
        last: ServiceLaunchPriority,
    },
    #[error("service {index} of priority group {priority} reports no interfaces")]
    InvalidServiceInstance {
        priority: ServiceLaunchPriority,
        index: usize,
    },
}

// ---------------------------------------------------------------------------
// HostError
// ---------------------------------------------------------------------------

/// Errors surfaced by hosts, proxies, and executor contexts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The target was destroyed, or its queue closed, before the call completed.
    #[error("target has been disposed")]
    TargetDisposed,
    #[error("host thread has already been started")]
    AlreadyStarted,
    #[error("host thread has not been started")]
    NotStarted,
    #[error("failed to start host thread: {0}")]
    ThreadSpawn(String),
    #[error("host thread terminated abnormally")]
    ThreadPanicked,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failure of a `ServiceHostProxy::call_service` invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceCallError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

// ---------------------------------------------------------------------------
// ServiceFailure / AggregateError
// ---------------------------------------------------------------------------

/// Lifecycle step in which a service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Create,
    Init,
    Rollback,
    Shutdown,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Create => "create",
            Self::Init => "init",
            Self::Rollback => "rollback",
            Self::Shutdown => "shutdown",
        };
        f.write_str(phase)
    }
}

/// A single service's failure, captured without aborting its peers.
#[derive(Debug, thiserror::Error)]
#[error("service {service} failed during {phase}: {error:#}")]
pub struct ServiceFailure {
    pub service: String,
    pub phase: FailurePhase,
    #[source]
    pub error: anyhow::Error,
}

impl ServiceFailure {
    #[must_use]
    pub fn new(service: impl Into<String>, phase: FailurePhase, error: anyhow::Error) -> Self {
        Self {
            service: service.into(),
            phase,
            error,
        }
    }
}

/// Collection of per-service failures from one start or shutdown sweep.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({} failure(s))", .failures.len())]
pub struct AggregateError {
    pub message: String,
    pub failures: Vec<ServiceFailure>,
}

impl AggregateError {
    #[must_use]
    pub fn new(message: impl Into<String>, failures: Vec<ServiceFailure>) -> Self {
        Self {
            message: message.into(),
            failures,
        }
    }

    /// Returns `true` if any failure belongs to `service` in `phase`.
    #[must_use]
    pub fn contains(&self, service: &str, phase: FailurePhase) -> bool {
        self.failures
            .iter()
            .any(|f| f.service == service && f.phase == phase)
    }
}

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// Errors from the lifecycle manager and service state tracking.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("services have already been started")]
    AlreadyStarted,
    #[error("service startup failed: {0}")]
    StartFailed(AggregateError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("invalid state transition for service {service}: {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },
}
