//! State types for tracking applied resources.
//!
//! A [`StateRecord`] is the last-applied snapshot of one resource, used for
//! diffing on the next plan. Records carry a [`Revision`] token that every
//! write must present, so concurrent writers cannot silently overwrite each
//! other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{Attributes, ResourceId};

/// Current version of the record format.
pub const STATE_VERSION: &str = "1.0";

/// Opaque revision token assigned by a state store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(Uuid);

/// Last-applied state of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Record format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Resource identity.
    pub id: ResourceId,
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Resolved attributes as last applied.
    pub attributes: Attributes,
    /// Outputs returned by the provider.
    #[serde(default)]
    pub outputs: Attributes,
    /// Resources this one depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Hash of `attributes`.
    pub attributes_hash: String,
    /// Revision token; `None` until the record has been stored.
    #[serde(default)]
    pub revision: Option<Revision>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> String {
    STATE_VERSION.to_string()
}

impl Revision {
    /// Generates a fresh, never-before-used token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StateRecord {
    /// Creates an unstored record.
    #[must_use]
    pub fn new(
        id: ResourceId,
        provider_id: &str,
        attributes: Attributes,
        attributes_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: default_version(),
            id,
            provider_id: provider_id.to_string(),
            attributes,
            outputs: Attributes::new(),
            dependencies: Vec::new(),
            attributes_hash: attributes_hash.to_string(),
            revision: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the provider outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Attributes) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Keeps the creation time of a previous record.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns the revision as display text, `none` if unstored.
    #[must_use]
    pub fn revision_label(&self) -> String {
        self.revision
            .as_ref()
            .map_or_else(|| String::from("none"), ToString::to_string)
    }
}
