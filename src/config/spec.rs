//! Manifest specification types.
//!
//! This module defines the structs that map to the `converge.yaml` file.
//! The manifest fully describes the desired resource set plus the settings
//! of the engine that converges it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Ensure, ResourceId};

/// Default number of nodes executed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Executor settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory for the local backend.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// One JSON file per record on the local filesystem.
    #[default]
    Local,
    /// Process-local memory; nothing survives the run.
    Memory,
}

/// Executor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of nodes in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Directory the local provider materializes resources into.
    #[serde(default)]
    pub root: Option<String>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Resource kind.
    pub kind: String,
    /// Logical name.
    pub name: String,
    /// Whether the resource should exist.
    #[serde(default)]
    pub ensure: Ensure,
    /// Explicit ordering dependencies (`Kind.name`) with no data flow.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Attribute values; strings may embed `${Kind.name.attribute}`.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Manifest {
    /// Creates a manifest with default settings and the given resources.
    #[must_use]
    pub fn new(project: &str, resources: Vec<ResourceDecl>) -> Self {
        Self {
            project: ProjectConfig {
                name: project.to_string(),
                environment: default_environment(),
            },
            state: StateConfig::default(),
            engine: EngineConfig::default(),
            provider: ProviderConfig::default(),
            resources,
        }
    }

    /// Returns the number of declarations that should exist.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.ensure == Ensure::Present)
            .count()
    }
}

impl ResourceDecl {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            ensure: Ensure::Present,
            depends_on: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, target: &str) -> Self {
        self.depends_on.push(target.to_string());
        self
    }

    /// Marks the declaration absent.
    #[must_use]
    pub const fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }

    /// Returns the declaration's identity.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.kind, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let yaml = r"
project:
  name: nl-to-iac
resources:
  - kind: Bucket
    name: artifacts
";
        let manifest: Manifest = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(manifest.project.environment, "dev");
        assert_eq!(manifest.state.backend, StateBackend::Local);
        assert_eq!(manifest.engine.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(manifest.resources[0].ensure, Ensure::Present);
        assert!(manifest.resources[0].attributes.is_empty());
    }

    #[test]
    fn test_absent_declaration() {
        let yaml = r"
project:
  name: nl-to-iac
resources:
  - kind: Bucket
    name: old
    ensure: absent
";
        let manifest: Manifest = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(manifest.resources[0].ensure, Ensure::Absent);
        assert_eq!(manifest.present_count(), 0);
    }
}
