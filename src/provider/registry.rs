//! Routes provider calls by resource kind.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::ProviderError;
use crate::model::{Attributes, ResourceId};

use super::traits::{Provider, ProviderResponse, ProviderResult};

/// A provider that dispatches to per-kind providers.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.providers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for one kind.
    #[must_use]
    pub fn with_kind(mut self, kind: &str, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(kind.to_string(), provider);
        self
    }

    /// Sets the provider used for kinds without a registration.
    #[must_use]
    pub fn with_fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Returns true if some provider handles `kind`.
    #[must_use]
    pub fn supports(&self, kind: &str) -> bool {
        self.fallback.is_some() || self.providers.contains_key(kind)
    }

    fn route(&self, id: &ResourceId) -> ProviderResult<&Arc<dyn Provider>> {
        let provider = self
            .providers
            .get(&id.kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ProviderError::UnknownKind {
                kind: id.kind.clone(),
            })?;
        debug!("Routing {id} to provider {}", provider.name());
        Ok(provider)
    }
}

#[async_trait]
impl Provider for ProviderRegistry {
    async fn create(
        &self,
        id: &ResourceId,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse> {
        self.route(id)?.create(id, attributes).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse> {
        self.route(id)?.update(id, provider_id, attributes).await
    }

    async fn delete(&self, id: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        self.route(id)?.delete(id, provider_id).await
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn mock(label: &'static str) -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_name().return_const(label);
        provider.expect_create().returning(move |_, _| {
            Ok(ProviderResponse {
                provider_id: label.to_string(),
                outputs: Attributes::new(),
            })
        });
        provider
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let registry = ProviderRegistry::new()
            .with_kind("Bucket", Arc::new(mock("buckets")))
            .with_fallback(Arc::new(mock("default")));

        let bucket = registry
            .create(&ResourceId::new("Bucket", "a"), &Attributes::new())
            .await
            .expect("create");
        assert_eq!(bucket.provider_id, "buckets");

        let other = registry
            .create(&ResourceId::new("Service", "api"), &Attributes::new())
            .await
            .expect("create");
        assert_eq!(other.provider_id, "default");
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let registry = ProviderRegistry::new().with_kind("Bucket", Arc::new(mock("buckets")));
        assert!(!registry.supports("Service"));

        let err = registry
            .delete(&ResourceId::new("Service", "api"), "x")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProviderError::UnknownKind { kind } if kind == "Service"));
    }
}
