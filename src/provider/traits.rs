//! Provider trait definition.
//!
//! A provider performs the side effects for one or more resource kinds. The
//! engine never retries a failed call; a provider that wants retries does
//! them internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::{Attributes, ResourceId};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// What a provider reports after creating or updating a resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Identifier the provider uses for the resource.
    pub provider_id: String,
    /// Outputs other resources may reference.
    pub outputs: Attributes,
}

/// Performs create, update and delete operations for resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource from fully resolved attributes.
    async fn create(
        &self,
        id: &ResourceId,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse>;

    /// Updates an existing resource in place.
    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse>;

    /// Deletes a resource.
    async fn delete(&self, id: &ResourceId, provider_id: &str) -> ProviderResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
