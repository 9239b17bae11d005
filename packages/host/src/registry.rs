//! One-shot registration table mapping interface tags to service factories.
//!
//! Applications register every factory up front, then hand the extracted
//! registrations to the lifecycle manager. After extraction the registry is
//! frozen: further registrations are rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use threadhost_core::{
    InterfaceTag, ServiceFactory, ServiceLaunchPriority, ServiceThreadGroupId, StartServiceRecord,
};

use crate::error::RegistryError;

// ---------------------------------------------------------------------------
// ServiceRegistrationRecord
// ---------------------------------------------------------------------------

/// One registered service: where and when it starts, and how it is built.
pub struct ServiceRegistrationRecord {
    pub name: String,
    pub factory: Box<dyn ServiceFactory>,
    pub priority: ServiceLaunchPriority,
    pub thread_group: ServiceThreadGroupId,
    pub options: Arc<serde_json::Value>,
}

impl ServiceRegistrationRecord {
    /// Drops the placement information, keeping what a host needs.
    #[must_use]
    pub fn into_start_record(self) -> StartServiceRecord {
        StartServiceRecord::with_options(self.name, self.factory, self.options)
    }
}

impl fmt::Debug for ServiceRegistrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistrationRecord")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("thread_group", &self.thread_group)
            .field("interfaces", &self.factory.supported_interfaces())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ServiceRegistry {
    registrations: Vec<ServiceRegistrationRecord>,
    by_tag: HashMap<InterfaceTag, String>,
    extracted: bool,
    next_thread_group: u32,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            by_tag: HashMap::new(),
            extracted: false,
            next_thread_group: 1,
        }
    }

    /// Registers `factory` under every interface it supports.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidFactory`] if `factory` is `None` or supports no interface
    /// - [`RegistryError::RegistryExtracted`] once [`Self::extract`] has run
    /// - [`RegistryError::DuplicateRegistration`] if any interface is already
    ///   taken; nothing is stored in that case
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: Option<Box<dyn ServiceFactory>>,
        priority: ServiceLaunchPriority,
        thread_group: ServiceThreadGroupId,
        options: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let Some(factory) = factory else {
            return Err(RegistryError::InvalidFactory {
                name,
                reason: "no factory given",
            });
        };
        if self.extracted {
            return Err(RegistryError::RegistryExtracted { name });
        }

        let tags = factory.supported_interfaces();
        if tags.is_empty() {
            return Err(RegistryError::InvalidFactory {
                name,
                reason: "factory supports no interfaces",
            });
        }
        if let Some((&tag, existing)) = tags
            .iter()
            .find_map(|tag| self.by_tag.get_key_value(tag))
        {
            return Err(RegistryError::DuplicateRegistration {
                name,
                existing: existing.clone(),
                tag,
            });
        }

        for tag in tags {
            self.by_tag.insert(tag, name.clone());
        }
        tracing::debug!(service = %name, %priority, %thread_group, "service registered");
        self.registrations.push(ServiceRegistrationRecord {
            name,
            factory,
            priority,
            thread_group,
            options: Arc::new(options),
        });
        Ok(())
    }

    /// Registers `factory` on the main thread group at normal priority.
    ///
    /// # Errors
    ///
    /// As [`Self::register_factory`].
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn ServiceFactory>,
    ) -> Result<(), RegistryError> {
        self.register_factory(
            name,
            Some(factory),
            ServiceLaunchPriority::NORMAL,
            ServiceThreadGroupId::MAIN,
            serde_json::Value::Null,
        )
    }

    /// Moves every registration out, in registration order, and freezes the
    /// registry. Later calls return an empty list.
    pub fn extract(&mut self) -> Vec<ServiceRegistrationRecord> {
        self.extracted = true;
        std::mem::take(&mut self.registrations)
    }

    /// Returns a thread group id not handed out before.
    pub fn create_thread_group_id(&mut self) -> ServiceThreadGroupId {
        let id = ServiceThreadGroupId::new(self.next_thread_group);
        self.next_thread_group += 1;
        id
    }

    #[must_use]
    pub fn main_thread_group_id(&self) -> ServiceThreadGroupId {
        ServiceThreadGroupId::MAIN
    }

    #[must_use]
    pub fn is_extracted(&self) -> bool {
        self.extracted
    }

    /// Registrations not yet extracted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Returns `true` if some registration claims `tag`. Tags stay claimed
    /// after extraction.
    #[must_use]
    pub fn contains(&self, tag: InterfaceTag) -> bool {
        self.by_tag.contains_key(&tag)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
