//! Filesystem provider.
//!
//! Materializes every resource as a JSON document under a root directory.
//! Useful for trying manifests end to end without touching real
//! infrastructure. Outputs are the resolved inputs plus the assigned `id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::model::{Attributes, ResourceId};

use super::traits::{Provider, ProviderResponse, ProviderResult};

/// Default provider root, relative to the project directory.
pub const DEFAULT_PROVIDER_ROOT: &str = ".converge/resources";

/// Document written for each resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResourceDocument {
    id: ResourceId,
    provider_id: String,
    attributes: Attributes,
    written_at: DateTime<Utc>,
}

/// Provider that writes resources to local files.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, provider_id: &str) -> PathBuf {
        self.root.join(format!("{provider_id}.json"))
    }

    fn outputs(provider_id: &str, attributes: &Attributes) -> Attributes {
        let mut outputs = attributes.clone();
        outputs.insert(String::from("id"), serde_json::Value::String(provider_id.to_string()));
        outputs
    }

    async fn write(
        &self,
        id: &ResourceId,
        action: &str,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<()> {
        let fail = |message: String| ProviderError::operation(id.to_string(), action, message);

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| fail(format!("cannot create {}: {e}", self.root.display())))?;

        let document = ResourceDocument {
            id: id.clone(),
            provider_id: provider_id.to_string(),
            attributes: attributes.clone(),
            written_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&document).map_err(|e| fail(e.to_string()))?;

        let path = self.document_path(provider_id);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, content).await.map_err(|e| fail(e.to_string()))?;
        fs::rename(&temp, &path).await.map_err(|e| fail(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn create(
        &self,
        id: &ResourceId,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse> {
        let provider_id = format!("{}-{}", id.key(), &Uuid::new_v4().simple().to_string()[..8]);
        self.write(id, "create", &provider_id, attributes).await?;
        info!("Created {id} as {provider_id}");

        Ok(ProviderResponse {
            outputs: Self::outputs(&provider_id, attributes),
            provider_id,
        })
    }

    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResponse> {
        if fs::metadata(self.document_path(provider_id)).await.is_err() {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            });
        }

        self.write(id, "update", provider_id, attributes).await?;
        info!("Updated {id} ({provider_id})");

        Ok(ProviderResponse {
            provider_id: provider_id.to_string(),
            outputs: Self::outputs(provider_id, attributes),
        })
    }

    async fn delete(&self, id: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        match fs::remove_file(self.document_path(provider_id)).await {
            Ok(()) => {
                info!("Deleted {id} ({provider_id})");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{id} ({provider_id}) was already gone");
                Ok(())
            }
            Err(e) => Err(ProviderError::operation(id.to_string(), "delete", e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
