//! Thread-safe facade over a `ServiceHost` living on another thread.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use threadhost_core::{ServiceLaunchPriority, StartServiceRecord};

use crate::dispatch::Dispatcher;
use crate::error::{HostError, ServiceCallError, ServiceFailure};
use crate::executor::ExecutorContext;
use crate::host::{ServiceHost, StartReport};

// ---------------------------------------------------------------------------
// ThreadSafeServiceHost trait
// ---------------------------------------------------------------------------

/// Operations on a service host that may be called from any thread.
#[async_trait]
pub trait ThreadSafeServiceHost: Send + Sync {
    /// Starts one priority group on the host's thread.
    ///
    /// # Errors
    ///
    /// [`HostError::TargetDisposed`] if the host is gone, or
    /// [`HostError::Provider`] if the priority is out of order.
    async fn try_start_services(
        &self,
        records: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> Result<StartReport, HostError>;

    /// Shuts down one priority group on the host's thread.
    ///
    /// # Errors
    ///
    /// [`HostError::TargetDisposed`] if the host is gone.
    async fn try_shutdown_services(
        &self,
        priority: ServiceLaunchPriority,
    ) -> Result<Vec<ServiceFailure>, HostError>;

    /// Asks the host to shut down and waits for the request to be delivered.
    /// Returns `false` if the host is gone or shutdown was already requested.
    async fn try_request_shutdown(&self) -> bool;

    /// Posts a shutdown request without waiting. Returns `false` only if the
    /// host's queue is closed.
    fn request_shutdown_now(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ServiceHostProxy
// ---------------------------------------------------------------------------

/// Marshals calls onto a host's thread through its dispatcher.
///
/// The proxy holds only a weak reference to the host; once the host is
/// destroyed every call fails with [`HostError::TargetDisposed`].
#[derive(Debug, Clone)]
pub struct ServiceHostProxy {
    context: ExecutorContext<ServiceHost>,
}

impl ServiceHostProxy {
    #[must_use]
    pub fn new(host: &Arc<ServiceHost>, dispatcher: Dispatcher) -> Self {
        Self {
            context: ExecutorContext::new(host, dispatcher),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.context.is_alive()
    }

    #[must_use]
    pub fn context(&self) -> &ExecutorContext<ServiceHost> {
        &self.context
    }

    /// Resolves the single service implementing `T` on the host's thread and
    /// runs `f` against it there.
    ///
    /// # Errors
    ///
    /// [`ServiceCallError::Host`] if the host is gone, or
    /// [`ServiceCallError::Discovery`] if `T` does not resolve to exactly one
    /// service.
    pub async fn call_service<T, R, F>(&self, f: F) -> Result<R, ServiceCallError>
    where
        T: ?Sized + Send + Sync + 'static,
        R: Send + 'static,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        self.context
            .invoke(move |host| {
                async move {
                    let service = host.with_service::<T>()?;
                    Ok::<R, ServiceCallError>(f(service.as_ref()))
                }
                .boxed()
            })
            .await?
    }
}

#[async_trait]
impl ThreadSafeServiceHost for ServiceHostProxy {
    async fn try_start_services(
        &self,
        records: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> Result<StartReport, HostError> {
        let started = self
            .context
            .invoke(move |host| async move { host.try_start_services(records, priority).await }.boxed())
            .await?;
        Ok(started?)
    }

    async fn try_shutdown_services(
        &self,
        priority: ServiceLaunchPriority,
    ) -> Result<Vec<ServiceFailure>, HostError> {
        self.context
            .invoke(move |host| async move { host.try_shutdown_services(priority).await }.boxed())
            .await
    }

    async fn try_request_shutdown(&self) -> bool {
        self.context
            .try_invoke(|host| async move { host.request_shutdown() }.boxed())
            .await
            .unwrap_or(false)
    }

    fn request_shutdown_now(&self) -> bool {
        self.context.try_post(|host| {
            async move {
                host.request_shutdown();
            }
            .boxed()
        })
    }
}
