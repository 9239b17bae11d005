use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ServiceLaunchPriority
// ---------------------------------------------------------------------------

/// Launch priority of a group of services.
///
/// Higher values start first and shut down last. Priority groups registered
/// with one provider must arrive in strictly decreasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceLaunchPriority(u32);

impl ServiceLaunchPriority {
    /// Priority used when a registration does not name one.
    pub const NORMAL: Self = Self(1000);

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ServiceLaunchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ServiceThreadGroupId
// ---------------------------------------------------------------------------

/// Identifies the thread a group of services is hosted on.
///
/// [`ServiceThreadGroupId::MAIN`] is reserved for services that run
/// cooperatively on the caller's own thread; every other id gets a dedicated
/// managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceThreadGroupId(u32);

impl ServiceThreadGroupId {
    /// The cooperative main-thread group.
    pub const MAIN: Self = Self(0);

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` for the cooperative main-thread group.
    #[must_use]
    pub const fn is_main(self) -> bool {
        self.0 == Self::MAIN.0
    }
}

impl fmt::Display for ServiceThreadGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// InterfaceTag
// ---------------------------------------------------------------------------

/// Explicit type tag for a service interface, usually a `dyn Trait`.
///
/// Equality and hashing use the `TypeId` only; the name is kept for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct InterfaceTag {
    id: TypeId,
    name: &'static str,
}

impl InterfaceTag {
    /// Tag for the interface type `T` (e.g. `InterfaceTag::of::<dyn Calculator>()`).
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for InterfaceTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InterfaceTag {}

impl Hash for InterfaceTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for InterfaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterfaceTag").field(&self.name).finish()
    }
}

impl fmt::Display for InterfaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle
// ---------------------------------------------------------------------------

/// Type-erased handle to one interface of a live service.
///
/// Wraps an `Arc<T>` (where `T` is typically `dyn SomeTrait`) so that the
/// provider can index services by [`InterfaceTag`] without knowing their
/// concrete types. Cloning the handle clones the inner `Arc`.
#[derive(Clone)]
pub struct ServiceHandle {
    tag: InterfaceTag,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ServiceHandle {
    /// Wraps `service` as the implementation of interface `T`.
    #[must_use]
    pub fn new<T: ?Sized + Send + Sync + 'static>(service: Arc<T>) -> Self {
        Self {
            tag: InterfaceTag::of::<T>(),
            inner: Arc::new(service),
        }
    }

    /// The interface this handle was created for.
    #[must_use]
    pub fn tag(&self) -> InterfaceTag {
        self.tag
    }

    /// Recovers the typed `Arc<T>`, or `None` if `T` is not the interface
    /// this handle was created for.
    #[must_use]
    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.downcast_ref::<Arc<T>>().cloned()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}
