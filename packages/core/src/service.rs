//! Service capability traits: lifecycle control and factories.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ServiceCreateInfo;
use crate::process::ProcessResult;
use crate::types::{InterfaceTag, ServiceHandle};

// ---------------------------------------------------------------------------
// ServiceControl trait
// ---------------------------------------------------------------------------

/// Lifecycle control implemented by every hosted service.
///
/// The host drives each instance through
/// `Created -> Initialized -> Running -> ShuttingDown -> Terminated`:
/// `init` runs once before any `process` call, `process` runs repeatedly on
/// the owning thread while the service is running, and `shutdown` runs once,
/// whether the service asked to quit or shutdown was requested externally.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Initialize the service. Other services in higher priority groups are
    /// already resolvable through `info.provider()`.
    async fn init(&self, info: &ServiceCreateInfo) -> anyhow::Result<()>;

    /// Perform one slice of periodic work. Default is a no-op with no
    /// sleep constraint.
    fn process(&self) -> ProcessResult {
        ProcessResult::NoSleepLimit
    }

    /// Shut the service down and release its resources.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Failure reported by a [`ServiceFactory`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("factory does not support interface {requested}")]
    UnsupportedType { requested: InterfaceTag },
    #[error(transparent)]
    Creation(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// ServiceFactory trait
// ---------------------------------------------------------------------------

/// Creates one service instance for one or more interface tags.
///
/// `create` consumes the factory, so a factory produces at most one instance.
pub trait ServiceFactory: Send {
    /// Interface tags the created instance implements. Must not be empty.
    fn supported_interfaces(&self) -> Vec<InterfaceTag>;

    /// Build the instance for `requested`, one of `supported_interfaces()`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnsupportedType`] if `requested` is not a
    /// supported tag, or [`ServiceError::Creation`] if construction fails.
    fn create(
        self: Box<Self>,
        requested: InterfaceTag,
        info: &ServiceCreateInfo,
    ) -> Result<ServiceInstanceInfo, ServiceError>;
}

// ---------------------------------------------------------------------------
// ServiceInstanceInfo
// ---------------------------------------------------------------------------

/// A live service instance and the interfaces it answers to.
#[derive(Clone)]
pub struct ServiceInstanceInfo {
    control: Arc<dyn ServiceControl>,
    interfaces: Vec<ServiceHandle>,
}

impl ServiceInstanceInfo {
    #[must_use]
    pub fn new(control: Arc<dyn ServiceControl>, interfaces: Vec<ServiceHandle>) -> Self {
        Self {
            control,
            interfaces,
        }
    }

    /// Starts an instance description from a concrete service, using it as
    /// its own control handle. Add interfaces with [`Self::with_interface`].
    #[must_use]
    pub fn for_service<S: ServiceControl + 'static>(service: &Arc<S>) -> Self {
        let control: Arc<dyn ServiceControl> = service.clone();
        Self::new(control, Vec::new())
    }

    /// Adds `service` as the implementation of interface `T`.
    #[must_use]
    pub fn with_interface<T: ?Sized + Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.interfaces.push(ServiceHandle::new(service));
        self
    }

    #[must_use]
    pub fn control(&self) -> &Arc<dyn ServiceControl> {
        &self.control
    }

    #[must_use]
    pub fn interfaces(&self) -> &[ServiceHandle] {
        &self.interfaces
    }

    /// Returns `true` if the instance answers to `tag`.
    #[must_use]
    pub fn supports(&self, tag: InterfaceTag) -> bool {
        self.interfaces.iter().any(|handle| handle.tag() == tag)
    }
}

impl fmt::Debug for ServiceInstanceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstanceInfo")
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Adder: Send + Sync {
        fn add(&self, a: i32, b: i32) -> i32;
    }

    trait Named: Send + Sync {}

    struct AddService;

    #[async_trait]
    impl ServiceControl for AddService {
        async fn init(&self, _info: &ServiceCreateInfo) -> anyhow::Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Adder for AddService {
        fn add(&self, a: i32, b: i32) -> i32 {
            a + b
        }
    }

    struct AddFactory;

    impl ServiceFactory for AddFactory {
        fn supported_interfaces(&self) -> Vec<InterfaceTag> {
            vec![InterfaceTag::of::<dyn Adder>()]
        }

        fn create(
            self: Box<Self>,
            requested: InterfaceTag,
            _info: &ServiceCreateInfo,
        ) -> Result<ServiceInstanceInfo, ServiceError> {
            if requested != InterfaceTag::of::<dyn Adder>() {
                return Err(ServiceError::UnsupportedType { requested });
            }
            let service = Arc::new(AddService);
            let adder: Arc<dyn Adder> = service.clone();
            Ok(ServiceInstanceInfo::for_service(&service).with_interface(adder))
        }
    }

    #[test]
    fn instance_info_reports_supported_tags() {
        let service = Arc::new(AddService);
        let adder: Arc<dyn Adder> = service.clone();
        let info = ServiceInstanceInfo::for_service(&service).with_interface(adder);

        assert!(info.supports(InterfaceTag::of::<dyn Adder>()));
        assert!(!info.supports(InterfaceTag::of::<dyn Named>()));
        assert_eq!(info.interfaces().len(), 1);
    }

    #[tokio::test]
    async fn default_process_has_no_sleep_limit() {
        let service = AddService;
        assert_eq!(service.process(), ProcessResult::NoSleepLimit);
        service.shutdown().await.unwrap();
    }

    #[test]
    fn factory_creates_requested_interface() {
        let info = ServiceCreateInfo::detached("adder");
        let instance = Box::new(AddFactory)
            .create(InterfaceTag::of::<dyn Adder>(), &info)
            .unwrap();
        let adder = instance.interfaces()[0].downcast::<dyn Adder>().unwrap();
        assert_eq!(adder.add(2, 3), 5);
    }

    #[test]
    fn factory_rejects_unsupported_interface() {
        let info = ServiceCreateInfo::detached("adder");
        let err = Box::new(AddFactory)
            .create(InterfaceTag::of::<dyn Named>(), &info)
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedType { .. }));
        assert!(err.to_string().contains("Named"));
    }
}
