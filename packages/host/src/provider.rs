//! Priority-group storage and discovery for one host thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;
use threadhost_core::{
    DiscoveryError, InterfaceTag, ServiceControl, ServiceDiscovery, ServiceHandle,
    ServiceInstanceInfo, ServiceLaunchPriority,
};

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// PriorityGroup
// ---------------------------------------------------------------------------

/// Services started together at one priority, in start order.
#[derive(Debug, Clone)]
pub struct PriorityGroup {
    pub priority: ServiceLaunchPriority,
    pub services: Vec<ServiceInstanceInfo>,
}

// ---------------------------------------------------------------------------
// ManagedThreadServiceProvider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProviderState {
    /// Registration order, i.e. strictly decreasing priority.
    groups: Vec<PriorityGroup>,
    index: HashMap<InterfaceTag, Vec<ServiceHandle>>,
    /// Floor for the next registration. Survives removal of single groups.
    last_registered: Option<ServiceLaunchPriority>,
}

impl ProviderState {
    fn check_order(&self, priority: ServiceLaunchPriority) -> Result<(), ProviderError> {
        match self.last_registered {
            Some(last) if priority >= last => Err(ProviderError::InvalidPriorityOrder { priority, last }),
            _ => Ok(()),
        }
    }
}

impl ProviderState {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for group in &self.groups {
            for service in &group.services {
                for handle in service.interfaces() {
                    self.index.entry(handle.tag()).or_default().push(handle.clone());
                }
            }
        }
    }
}

/// Stores the priority groups running on one host thread and resolves them by
/// interface tag.
///
/// Registration enforces strictly decreasing priorities. Discovery is only
/// allowed from the thread that created the provider.
pub struct ManagedThreadServiceProvider {
    owner: ThreadId,
    state: RwLock<ProviderState>,
}

impl ManagedThreadServiceProvider {
    /// Creates a provider owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            state: RwLock::new(ProviderState::default()),
        }
    }

    #[must_use]
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Checks that a group at `priority` could be registered next.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidPriorityOrder`] if `priority` is not
    /// strictly lower than the most recently registered one, even if that
    /// group has since been unregistered.
    pub fn check_next_priority(&self, priority: ServiceLaunchPriority) -> Result<(), ProviderError> {
        self.state.read().check_order(priority)
    }

    /// Appends a priority group and indexes its interfaces. Nothing is stored
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::EmptyPriorityGroup`] if `services` is empty
    /// - [`ProviderError::InvalidPriorityOrder`] if `priority` does not
    ///   strictly decrease
    /// - [`ProviderError::InvalidServiceInstance`] if an instance reports no
    ///   interfaces
    pub fn register_priority_group(
        &self,
        priority: ServiceLaunchPriority,
        services: Vec<ServiceInstanceInfo>,
    ) -> Result<(), ProviderError> {
        if services.is_empty() {
            return Err(ProviderError::EmptyPriorityGroup { priority });
        }
        if let Some(index) = services.iter().position(|s| s.interfaces().is_empty()) {
            return Err(ProviderError::InvalidServiceInstance { priority, index });
        }

        let mut state = self.state.write();
        state.check_order(priority)?;
        state.last_registered = Some(priority);
        for service in &services {
            for handle in service.interfaces() {
                state.index.entry(handle.tag()).or_default().push(handle.clone());
            }
        }
        tracing::debug!(%priority, services = services.len(), "priority group registered");
        state.groups.push(PriorityGroup { priority, services });
        Ok(())
    }

    /// Removes the group at `priority` and returns its services in start
    /// order. Returns an empty vec if no such group exists.
    pub fn unregister_priority_group(&self, priority: ServiceLaunchPriority) -> Vec<ServiceInstanceInfo> {
        let mut state = self.state.write();
        let Some(position) = state.groups.iter().position(|g| g.priority == priority) else {
            return Vec::new();
        };
        let group = state.groups.remove(position);
        state.rebuild_index();
        group.services
    }

    /// Removes every group, returned in shutdown order (lowest priority first),
    /// and resets the priority floor.
    pub fn unregister_all_services(&self) -> Vec<PriorityGroup> {
        let mut state = self.state.write();
        state.index.clear();
        state.last_registered = None;
        let mut groups = std::mem::take(&mut state.groups);
        groups.reverse();
        groups
    }

    #[must_use]
    pub fn service_count(&self) -> usize {
        self.state.read().groups.iter().map(|g| g.services.len()).sum()
    }

    /// Control handles of every registered service, in registration order.
    #[must_use]
    pub fn all_service_controls(&self) -> Vec<Arc<dyn ServiceControl>> {
        self.state
            .read()
            .groups
            .iter()
            .flat_map(|g| g.services.iter().map(|s| Arc::clone(s.control())))
            .collect()
    }

    /// Registered priorities, highest first.
    #[must_use]
    pub fn priorities(&self) -> Vec<ServiceLaunchPriority> {
        self.state.read().groups.iter().map(|g| g.priority).collect()
    }

    fn check_thread(&self) -> Result<(), DiscoveryError> {
        let caller = thread::current().id();
        if caller == self.owner {
            Ok(())
        } else {
            Err(DiscoveryError::WrongThread {
                owner: self.owner,
                caller,
            })
        }
    }

    fn is_owner_thread_or_warn(&self, tag: InterfaceTag) -> bool {
        match self.check_thread() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%tag, error = %err, "discovery from foreign thread ignored");
                false
            }
        }
    }
}

impl Default for ManagedThreadServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDiscovery for ManagedThreadServiceProvider {
    fn get_service(&self, tag: InterfaceTag) -> Result<ServiceHandle, DiscoveryError> {
        self.check_thread()?;
        let state = self.state.read();
        match state.index.get(&tag).map(Vec::as_slice) {
            None | Some([]) => Err(DiscoveryError::UnknownService { tag }),
            Some([single]) => Ok(single.clone()),
            Some(many) => Err(DiscoveryError::MultipleServicesFound {
                tag,
                count: many.len(),
            }),
        }
    }

    fn try_get_service(&self, tag: InterfaceTag) -> Option<ServiceHandle> {
        if !self.is_owner_thread_or_warn(tag) {
            return None;
        }
        match self.state.read().index.get(&tag).map(Vec::as_slice) {
            Some([single]) => Some(single.clone()),
            _ => None,
        }
    }

    fn try_get_services(&self, tag: InterfaceTag, out: &mut Vec<ServiceHandle>) -> bool {
        if !self.is_owner_thread_or_warn(tag) {
            return false;
        }
        match self.state.read().index.get(&tag) {
            Some(handles) if !handles.is_empty() => {
                out.extend(handles.iter().cloned());
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ManagedThreadServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThreadServiceProvider")
            .field("owner", &self.owner)
            .field("priorities", &self.priorities())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use proptest::prelude::*;
    use threadhost_core::ServiceCreateInfo;

    use super::*;

    trait Calculator: Send + Sync {
        fn id(&self) -> u32;
    }

    trait Logger: Send + Sync {}

    struct Calc(u32);

    #[async_trait]
    impl ServiceControl for Calc {
        async fn init(&self, _info: &ServiceCreateInfo) -> anyhow::Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Calculator for Calc {
        fn id(&self) -> u32 {
            self.0
        }
    }

    impl Logger for Calc {}

    fn calc(id: u32) -> ServiceInstanceInfo {
        let service = Arc::new(Calc(id));
        let calculator: Arc<dyn Calculator> = service.clone();
        ServiceInstanceInfo::for_service(&service).with_interface(calculator)
    }

    fn calc_and_logger(id: u32) -> ServiceInstanceInfo {
        let service = Arc::new(Calc(id));
        let logger: Arc<dyn Logger> = service.clone();
        calc(id).with_interface(logger)
    }

    fn p(value: u32) -> ServiceLaunchPriority {
        ServiceLaunchPriority::new(value)
    }

    fn calculator_id(provider: &ManagedThreadServiceProvider) -> Result<u32, DiscoveryError> {
        let handle = provider.get_service(InterfaceTag::of::<dyn Calculator>())?;
        Ok(handle.downcast::<dyn Calculator>().map_or(0, |c| c.id()))
    }

    #[test]
    fn empty_group_is_rejected() {
        let provider = ManagedThreadServiceProvider::new();
        let err = provider.register_priority_group(p(1000), Vec::new()).unwrap_err();
        assert_eq!(err, ProviderError::EmptyPriorityGroup { priority: p(1000) });
        assert_eq!(provider.service_count(), 0);
    }

    #[test]
    fn decreasing_priorities_are_accepted() {
        let provider = ManagedThreadServiceProvider::new();
        provider.register_priority_group(p(1000), vec![calc(1)]).unwrap();
        provider.register_priority_group(p(500), vec![calc(2)]).unwrap();
        provider.register_priority_group(p(100), vec![calc(3)]).unwrap();
        assert_eq!(provider.priorities(), vec![p(1000), p(500), p(100)]);
        assert_eq!(provider.service_count(), 3);
    }

    #[test]
    fn equal_or_higher_priority_is_rejected_without_side_effects() {
        let provider = ManagedThreadServiceProvider::new();
        provider.register_priority_group(p(500), vec![calc(1)]).unwrap();

        let same = provider.register_priority_group(p(500), vec![calc(2)]).unwrap_err();
        assert_eq!(
            same,
            ProviderError::InvalidPriorityOrder {
                priority: p(500),
                last: p(500)
            }
        );
        let higher = provider.register_priority_group(p(600), vec![calc(3)]).unwrap_err();
        assert!(matches!(higher, ProviderError::InvalidPriorityOrder { .. }));

        assert_eq!(provider.service_count(), 1);
        assert_eq!(calculator_id(&provider), Ok(1));
        assert!(provider.check_next_priority(p(500)).is_err());
        assert!(provider.check_next_priority(p(499)).is_ok());
    }

    #[test]
    fn instance_without_interfaces_is_rejected() {
        let provider = ManagedThreadServiceProvider::new();
        let bare = ServiceInstanceInfo::for_service(&Arc::new(Calc(9)));
        let err = provider
            .register_priority_group(p(10), vec![calc(1), bare])
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::InvalidServiceInstance {
                priority: p(10),
                index: 1
            }
        );
        assert_eq!(provider.service_count(), 0);
    }

    #[test]
    fn get_service_with_zero_one_and_two_implementors() {
        let provider = ManagedThreadServiceProvider::new();
        let tag = InterfaceTag::of::<dyn Calculator>();

        assert!(matches!(
            provider.get_service(tag),
            Err(DiscoveryError::UnknownService { .. })
        ));
        assert!(provider.try_get_service(tag).is_none());

        provider.register_priority_group(p(200), vec![calc(1)]).unwrap();
        assert_eq!(calculator_id(&provider), Ok(1));
        assert!(provider.try_get_service(tag).is_some());

        provider.register_priority_group(p(100), vec![calc(2)]).unwrap();
        assert!(matches!(
            provider.get_service(tag),
            Err(DiscoveryError::MultipleServicesFound { count: 2, .. })
        ));
        assert!(provider.try_get_service(tag).is_none());

        let mut all = Vec::new();
        assert!(provider.try_get_services(tag, &mut all));
        let ids: Vec<u32> = all
            .iter()
            .filter_map(|h| h.downcast::<dyn Calculator>())
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn unregister_group_removes_its_interfaces() {
        let provider = ManagedThreadServiceProvider::new();
        provider.register_priority_group(p(200), vec![calc_and_logger(1)]).unwrap();
        provider.register_priority_group(p(100), vec![calc(2)]).unwrap();

        let removed = provider.unregister_priority_group(p(200));
        assert_eq!(removed.len(), 1);
        assert_eq!(calculator_id(&provider), Ok(2));
        assert!(provider
            .try_get_service(InterfaceTag::of::<dyn Logger>())
            .is_none());
        assert!(provider.unregister_priority_group(p(999)).is_empty());
    }

    #[test]
    fn priority_floor_survives_unregistering_the_last_group() {
        let provider = ManagedThreadServiceProvider::new();
        provider.register_priority_group(p(1000), vec![calc(1)]).unwrap();
        provider.register_priority_group(p(500), vec![calc(2)]).unwrap();
        provider.unregister_priority_group(p(500));

        for rejected in [p(600), p(500)] {
            assert_eq!(
                provider.register_priority_group(rejected, vec![calc(3)]),
                Err(ProviderError::InvalidPriorityOrder {
                    priority: rejected,
                    last: p(500),
                })
            );
            assert!(provider.check_next_priority(rejected).is_err());
        }
        provider.register_priority_group(p(400), vec![calc(4)]).unwrap();
        assert_eq!(provider.priorities(), vec![p(1000), p(400)]);
    }

    #[test]
    fn unregister_all_returns_shutdown_order() {
        let provider = ManagedThreadServiceProvider::new();
        provider.register_priority_group(p(300), vec![calc(1)]).unwrap();
        provider.register_priority_group(p(200), vec![calc(2), calc(3)]).unwrap();
        assert_eq!(provider.all_service_controls().len(), 3);

        let groups = provider.unregister_all_services();
        let order: Vec<ServiceLaunchPriority> = groups.iter().map(|g| g.priority).collect();
        assert_eq!(order, vec![p(200), p(300)]);
        assert_eq!(provider.service_count(), 0);
        assert!(provider.priorities().is_empty());
        // A fresh sequence may start again once everything is gone.
        provider.register_priority_group(p(1000), vec![calc(4)]).unwrap();
    }

    #[test]
    fn discovery_from_foreign_thread_is_rejected() {
        let provider = Arc::new(ManagedThreadServiceProvider::new());
        provider.register_priority_group(p(1), vec![calc(1)]).unwrap();
        let tag = InterfaceTag::of::<dyn Calculator>();

        let remote = Arc::clone(&provider);
        let (strict, lenient) = std::thread::spawn(move || {
            let mut out = Vec::new();
            (
                remote.get_service(tag).map(|_| ()),
                remote.try_get_service(tag).is_none() && !remote.try_get_services(tag, &mut out),
            )
        })
        .join()
        .unwrap();

        assert!(matches!(strict, Err(DiscoveryError::WrongThread { .. })));
        assert!(lenient);
    }

    proptest! {
        #[test]
        fn registration_accepts_exactly_strictly_decreasing_sequences(
            priorities in proptest::collection::vec(0u32..50, 1..8)
        ) {
            let provider = ManagedThreadServiceProvider::new();
            let mut last: Option<u32> = None;
            for (i, value) in priorities.iter().copied().enumerate() {
                let result = provider.register_priority_group(p(value), vec![calc(u32::try_from(i).unwrap())]);
                let expected_ok = last.map_or(true, |l| value < l);
                prop_assert_eq!(result.is_ok(), expected_ok);
                if expected_ok {
                    last = Some(value);
                }
            }
            let registered = provider.priorities();
            prop_assert!(registered.windows(2).all(|w| w[0] > w[1]));
        }
    }
}
