//! Creation context handed to factories and to `ServiceControl::init`.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::provider::ServiceProvider;

/// Everything a service gets to see while it is being created and initialized.
#[derive(Debug, Clone)]
pub struct ServiceCreateInfo {
    service_name: String,
    provider: ServiceProvider,
    options: Arc<serde_json::Value>,
}

impl ServiceCreateInfo {
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        provider: ServiceProvider,
        options: Arc<serde_json::Value>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            provider,
            options,
        }
    }

    /// Context with no discovery backing and null options. Discovery through it
    /// always reports a disposed provider.
    #[must_use]
    pub fn detached(service_name: impl Into<String>) -> Self {
        Self::new(
            service_name,
            ServiceProvider::detached(),
            Arc::new(serde_json::Value::Null),
        )
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Discovery facade for the host this service lives in.
    #[must_use]
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    /// Raw options blob registered alongside the factory.
    #[must_use]
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    /// Deserializes the options blob into `T`.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the blob does not match `T`.
    pub fn options_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.options.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct PoolOptions {
        size: u32,
        #[serde(default)]
        label: Option<String>,
    }

    #[test]
    fn detached_context_has_null_options() {
        let info = ServiceCreateInfo::detached("pool");
        assert_eq!(info.service_name(), "pool");
        assert!(info.options().is_null());
        assert!(!info.provider().is_alive());
    }

    #[test]
    fn options_deserialize_into_typed_struct() {
        let info = ServiceCreateInfo::new(
            "pool",
            ServiceProvider::detached(),
            Arc::new(serde_json::json!({ "size": 4 })),
        );
        let options: PoolOptions = info.options_as().unwrap();
        assert_eq!(
            options,
            PoolOptions {
                size: 4,
                label: None
            }
        );
    }

    #[test]
    fn mismatched_options_report_error() {
        let info = ServiceCreateInfo::new(
            "pool",
            ServiceProvider::detached(),
            Arc::new(serde_json::json!({ "size": "four" })),
        );
        assert!(info.options_as::<PoolOptions>().is_err());
    }
}
