//! Type-based service discovery.
//!
//! [`ServiceDiscovery`] is implemented by whatever owns the live instances.
//! Services never hold it strongly: they get a [`ServiceProvider`], a weak
//! facade that starts failing with [`DiscoveryError::ProviderDisposed`] once
//! the backing store is gone. Hosts put a [`ServiceProviderProxy`] in
//! between so they can disconnect everything handed out during a start
//! attempt that did not succeed.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::RwLock;

use crate::types::{InterfaceTag, ServiceHandle};

// ---------------------------------------------------------------------------
// DiscoveryError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no service registered for {tag}")]
    UnknownService { tag: InterfaceTag },
    #[error("{count} services registered for {tag}, expected exactly one")]
    MultipleServicesFound { tag: InterfaceTag, count: usize },
    #[error("service provider has been disposed")]
    ProviderDisposed,
    #[error("service provider owned by thread {owner:?} accessed from thread {caller:?}")]
    WrongThread { owner: ThreadId, caller: ThreadId },
    #[error("service registered for {tag} has an unexpected type")]
    ServiceCast { tag: InterfaceTag },
}

// ---------------------------------------------------------------------------
// ServiceDiscovery trait
// ---------------------------------------------------------------------------

/// Lookup of live services by interface tag.
pub trait ServiceDiscovery: Send + Sync {
    /// Returns the single service registered for `tag`.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::UnknownService`] if none is registered,
    /// [`DiscoveryError::MultipleServicesFound`] if more than one is.
    fn get_service(&self, tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError>;

    /// Returns the service for `tag` only when exactly one is registered.
    fn try_get_service(&self, tag: InterfaceTag) -> Option<ServiceHandle>;

    /// Appends every service registered for `tag` to `out`. Returns `true`
    /// if at least one was found.
    fn try_get_services(&self, tag: InterfaceTag, out: &mut Vec<ServiceHandle>) -> bool;
}

// ---------------------------------------------------------------------------
// ServiceProvider
// ---------------------------------------------------------------------------

/// Weak discovery facade handed to services.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    inner: Option<Weak<dyn ServiceDiscovery>>,
}

impl ServiceProvider {
    #[must_use]
    pub fn new(discovery: Weak<dyn ServiceDiscovery>) -> Self {
        Self {
            inner: Some(discovery),
        }
    }

    /// Facade over `discovery` that does not keep it alive.
    #[must_use]
    pub fn from_arc(discovery: &Arc<dyn ServiceDiscovery>) -> Self {
        Self::new(Arc::downgrade(discovery))
    }

    /// Facade with no backing at all.
    #[must_use]
    pub fn detached() -> Self {
        Self { inner: None }
    }

    /// Returns `true` while the backing store is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    fn upgrade(&self) -> Option<Arc<dyn ServiceDiscovery>> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }

    /// # Errors
    ///
    /// Same as [`ServiceDiscovery::get_service`], plus
    /// [`DiscoveryError::ProviderDisposed`] when the backing store is gone.
    pub fn get_service(&self, tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError> {
        self.upgrade()
            .ok_or(DiscoveryError::ProviderDisposed)?
            .get_service(tag)
    }

    #[must_use]
    pub fn try_get_service(&self, tag: InterfaceTag) -> Option<ServiceHandle> {
        self.upgrade()?.try_get_service(tag)
    }

    pub fn try_get_services(&self, tag: InterfaceTag, out: &mut Vec<ServiceHandle>) -> bool {
        self.upgrade()
            .is_some_and(|discovery| discovery.try_get_services(tag, out))
    }

    /// Typed form of [`Self::get_service`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_service`], plus [`DiscoveryError::ServiceCast`] if
    /// the registered handle does not hold an `Arc<T>`.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, DiscoveryError> {
        let tag = InterfaceTag::of::<T>();
        self.get_service(tag)?
            .downcast::<T>()
            .ok_or(DiscoveryError::ServiceCast { tag })
    }

    #[must_use]
    pub fn try_get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.try_get_service(InterfaceTag::of::<T>())?.downcast::<T>()
    }

    /// Appends every service implementing `T` to `out`.
    pub fn try_get_all<T: ?Sized + Send + Sync + 'static>(&self, out: &mut Vec<Arc<T>>) -> bool {
        let mut handles = Vec::new();
        if !self.try_get_services(InterfaceTag::of::<T>(), &mut handles) {
            return false;
        }
        let before = out.len();
        out.extend(handles.iter().filter_map(ServiceHandle::downcast::<T>));
        out.len() > before
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ServiceProviderProxy
// ---------------------------------------------------------------------------

/// Discovery forwarder holding a clearable strong reference.
///
/// After [`Self::clear`] every lookup behaves as if the provider were
/// disposed.
pub struct ServiceProviderProxy {
    inner: RwLock<Option<Arc<dyn ServiceDiscovery>>>,
}

impl ServiceProviderProxy {
    #[must_use]
    pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self {
            inner: RwLock::new(Some(discovery)),
        }
    }

    /// Drops the strong reference. Idempotent.
    pub fn clear(&self) {
        self.inner.write().take();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn ServiceDiscovery>> {
        self.inner.read().clone()
    }
}

impl ServiceDiscovery for ServiceProviderProxy {
    fn get_service(&self, tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError> {
        self.current()
            .ok_or(DiscoveryError::ProviderDisposed)?
            .get_service(tag)
    }

    fn try_get_service(&self, tag: InterfaceTag) -> Option<ServiceHandle> {
        self.current()?.try_get_service(tag)
    }

    fn try_get_services(&self, tag: InterfaceTag, out: &mut Vec<ServiceHandle>) -> bool {
        self.current()
            .is_some_and(|discovery| discovery.try_get_services(tag, out))
    }
}

impl fmt::Debug for ServiceProviderProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProviderProxy")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }

    trait Colour: Send + Sync {}

    struct Square;
    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    struct Triangle;
    impl Shape for Triangle {
        fn sides(&self) -> u32 {
            3
        }
    }

    /// Flat list of handles; enough to exercise the facades.
    struct ListDiscovery(Vec<ServiceHandle>);

    impl ListDiscovery {
        fn matching(&self, tag: InterfaceTag) -> Vec<ServiceHandle> {
            self.0.iter().filter(|h| h.tag() == tag).cloned().collect()
        }
    }

    impl ServiceDiscovery for ListDiscovery {
        fn get_service(&self, tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError> {
            let mut found = self.matching(tag);
            match found.len() {
                0 => Err(DiscoveryError::UnknownService { tag }),
                1 => Ok(found.remove(0)),
                count => Err(DiscoveryError::MultipleServicesFound { tag, count }),
            }
        }

        fn try_get_service(&self, tag: InterfaceTag) -> Option<ServiceHandle> {
            self.get_service(tag).ok()
        }

        fn try_get_services(&self, tag: InterfaceTag, out: &mut Vec<ServiceHandle>) -> bool {
            let found = self.matching(tag);
            let any = !found.is_empty();
            out.extend(found);
            any
        }
    }

    fn shape(s: impl Shape + 'static) -> ServiceHandle {
        let s: Arc<dyn Shape> = Arc::new(s);
        ServiceHandle::new(s)
    }

    fn discovery(handles: Vec<ServiceHandle>) -> Arc<dyn ServiceDiscovery> {
        Arc::new(ListDiscovery(handles))
    }

    #[test]
    fn typed_get_resolves_single_service() {
        let backing = discovery(vec![shape(Square)]);
        let provider = ServiceProvider::from_arc(&backing);

        assert_eq!(provider.get::<dyn Shape>().unwrap().sides(), 4);
        assert_eq!(provider.try_get::<dyn Shape>().unwrap().sides(), 4);
    }

    #[test]
    fn unknown_and_ambiguous_lookups() {
        let empty = discovery(Vec::new());
        let provider = ServiceProvider::from_arc(&empty);
        assert!(matches!(
            provider.get::<dyn Shape>(),
            Err(DiscoveryError::UnknownService { .. })
        ));
        assert!(provider.try_get::<dyn Shape>().is_none());

        let two = discovery(vec![shape(Square), shape(Triangle)]);
        let provider = ServiceProvider::from_arc(&two);
        assert!(matches!(
            provider.get::<dyn Shape>(),
            Err(DiscoveryError::MultipleServicesFound { count: 2, .. })
        ));
        assert!(provider.try_get::<dyn Shape>().is_none());

        let mut all: Vec<Arc<dyn Shape>> = Vec::new();
        assert!(provider.try_get_all(&mut all));
        let mut sides: Vec<u32> = all.iter().map(|s| s.sides()).collect();
        sides.sort_unstable();
        assert_eq!(sides, vec![3, 4]);
    }

    #[test]
    fn dropped_backing_reports_disposed() {
        let backing = discovery(vec![shape(Square)]);
        let provider = ServiceProvider::from_arc(&backing);
        assert!(provider.is_alive());
        drop(backing);

        assert!(!provider.is_alive());
        assert!(matches!(
            provider.get::<dyn Shape>(),
            Err(DiscoveryError::ProviderDisposed)
        ));
        assert!(provider.try_get::<dyn Shape>().is_none());
        let mut out = Vec::new();
        assert!(!provider.try_get_services(InterfaceTag::of::<dyn Shape>(), &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn detached_provider_is_never_alive() {
        let provider = ServiceProvider::detached();
        assert!(!provider.is_alive());
        assert!(matches!(
            provider.get_service(InterfaceTag::of::<dyn Colour>()),
            Err(DiscoveryError::ProviderDisposed)
        ));
    }

    #[test]
    fn cleared_proxy_disconnects_weak_providers() {
        let proxy: Arc<ServiceProviderProxy> =
            Arc::new(ServiceProviderProxy::new(discovery(vec![shape(Square)])));
        let as_discovery: Arc<dyn ServiceDiscovery> = proxy.clone();
        let provider = ServiceProvider::from_arc(&as_discovery);

        assert_eq!(provider.get::<dyn Shape>().unwrap().sides(), 4);

        proxy.clear();
        assert!(!proxy.is_connected());
        // The proxy itself is still alive, but has nothing to forward to.
        assert!(provider.is_alive());
        assert!(matches!(
            provider.get::<dyn Shape>(),
            Err(DiscoveryError::ProviderDisposed)
        ));
        assert!(provider.try_get::<dyn Shape>().is_none());
        proxy.clear();
    }

    #[test]
    fn mismatched_handle_reports_cast_error() {
        struct Liar;
        impl ServiceDiscovery for Liar {
            fn get_service(&self, _tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError> {
                Ok(shape(Square))
            }
            fn try_get_service(&self, _tag: InterfaceTag) -> Option<ServiceHandle> {
                None
            }
            fn try_get_services(&self, _tag: InterfaceTag, _out: &mut Vec<ServiceHandle>) -> bool {
                false
            }
        }

        let backing: Arc<dyn ServiceDiscovery> = Arc::new(Liar);
        let provider = ServiceProvider::from_arc(&backing);
        assert!(matches!(
            provider.get::<dyn Colour>(),
            Err(DiscoveryError::ServiceCast { .. })
        ));
    }
}
