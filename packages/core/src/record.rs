use std::fmt;
use std::sync::Arc;

use crate::service::ServiceFactory;

/// What a host needs to start one service: a name for diagnostics, the
/// factory that builds it, and its options blob.
///
/// The factory is consumed when the instance is created, so a record is spent
/// after one start attempt.
pub struct StartServiceRecord {
    pub name: String,
    pub factory: Box<dyn ServiceFactory>,
    pub options: Arc<serde_json::Value>,
}

impl StartServiceRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, factory: Box<dyn ServiceFactory>) -> Self {
        Self::with_options(name, factory, Arc::new(serde_json::Value::Null))
    }

    #[must_use]
    pub fn with_options(
        name: impl Into<String>,
        factory: Box<dyn ServiceFactory>,
        options: Arc<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            options,
        }
    }
}

impl fmt::Debug for StartServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartServiceRecord")
            .field("name", &self.name)
            .field("interfaces", &self.factory.supported_interfaces())
            .finish_non_exhaustive()
    }
}
