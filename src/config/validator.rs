//! Manifest validation.
//!
//! This module checks a manifest for structural problems before any graph
//! is built: naming rules, duplicate identities, dependency syntax, and
//! engine limits.

use crate::error::{ConfigError, ConvergeError, Result};
use crate::model::{is_valid_kind, is_valid_resource_name, Ensure, ResourceId};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{EngineConfig, Manifest, ProjectConfig, ResourceDecl, StateBackend, StateConfig};

/// Upper bound on `engine.concurrency`.
pub const MAX_CONCURRENCY: usize = 256;

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if let Some(first_error) = result.errors.first() {
            return Err(ConvergeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Manifest validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&manifest.project, &mut result);
        Self::validate_state(&manifest.state, &mut result);
        Self::validate_engine(&manifest.engine, &mut result);
        Self::validate_resources(&manifest.resources, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::Local => {
                if state.path.as_ref().is_some_and(String::is_empty) {
                    result.error("state.path", "State path cannot be empty");
                }
            }
            StateBackend::Memory => {
                result.warnings.push(String::from(
                    "Memory state backend keeps nothing between runs; \
                     every plan starts from empty state",
                ));
            }
        }
    }

    fn validate_engine(engine: &EngineConfig, result: &mut ValidationResult) {
        if engine.concurrency == 0 || engine.concurrency > MAX_CONCURRENCY {
            result.error(
                "engine.concurrency",
                format!(
                    "Concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                    engine.concurrency
                ),
            );
        }
    }

    fn validate_resources(resources: &[ResourceDecl], result: &mut ValidationResult) {
        let mut seen: HashSet<ResourceId> = HashSet::new();

        for (i, decl) in resources.iter().enumerate() {
            let field = format!("resources[{i}]");

            if !is_valid_kind(&decl.kind) {
                result.error(
                    format!("{field}.kind"),
                    format!(
                        "Kind '{}' is invalid. Must start with a letter and contain \
                         only alphanumerics or '_'.",
                        decl.kind
                    ),
                );
            }

            if !is_valid_resource_name(&decl.name) {
                result.error(
                    format!("{field}.name"),
                    format!(
                        "Name '{}' is invalid. Must be alphanumeric with '-' or '_'.",
                        decl.name
                    ),
                );
            }

            if !seen.insert(decl.id()) {
                result.error(
                    format!("{field}.name"),
                    format!("Duplicate resource: {}", decl.id()),
                );
            }

            for dep in &decl.depends_on {
                if let Err(reason) = dep.parse::<ResourceId>() {
                    result.error(format!("{field}.depends_on"), reason);
                }
            }

            if decl.ensure == Ensure::Absent && !decl.attributes.is_empty() {
                result.warnings.push(format!(
                    "{} is marked absent; its attributes are ignored",
                    decl.id()
                ));
            }
        }

        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared; apply will delete everything in state"));
        }
    }
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Checks if a project name is valid (lowercase alphanumeric with hyphens).
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}
