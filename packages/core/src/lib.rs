//! `threadhost` core: service traits, interface tags, process status, and the discovery facade.

pub mod context;
pub mod process;
pub mod provider;
pub mod record;
pub mod service;
pub mod types;

pub use context::ServiceCreateInfo;
pub use process::{ProcessResult, DEFAULT_MAX_SLEEP_LIMIT};
pub use provider::{DiscoveryError, ServiceDiscovery, ServiceProvider, ServiceProviderProxy};
pub use record::StartServiceRecord;
pub use service::{ServiceControl, ServiceError, ServiceFactory, ServiceInstanceInfo};
pub use types::{InterfaceTag, ServiceHandle, ServiceLaunchPriority, ServiceThreadGroupId};
