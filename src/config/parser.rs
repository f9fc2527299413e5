//! Manifest parser for loading and overriding configuration.
//!
//! This module handles loading the manifest from YAML files and applying
//! environment variable overrides, with proper precedence and error handling.

use crate::error::{ConfigError, ConvergeError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Manifest;

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!(
            "Parsed manifest for project {} ({} resources)",
            manifest.project.name,
            manifest.resources.len()
        );
        Ok(manifest)
    }

    /// Loads a manifest and applies process environment overrides.
    ///
    /// Recognised variables: `CONVERGE_PROJECT_ENVIRONMENT`,
    /// `CONVERGE_STATE_PATH`, `CONVERGE_CONCURRENCY`, `CONVERGE_PROVIDER_ROOT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        apply_overrides(&mut manifest, |key| std::env::var(key).ok())?;
        Ok(manifest)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies overrides read through `lookup` to the manifest.
///
/// # Errors
///
/// Returns a validation error if `CONVERGE_CONCURRENCY` is not a number.
pub fn apply_overrides<F>(manifest: &mut Manifest, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("CONVERGE_PROJECT_ENVIRONMENT") {
        debug!("Overriding project.environment from environment");
        manifest.project.environment = env;
    }

    if let Some(path) = lookup("CONVERGE_STATE_PATH") {
        debug!("Overriding state.path from environment");
        manifest.state.path = Some(path);
    }

    if let Some(raw) = lookup("CONVERGE_CONCURRENCY") {
        debug!("Overriding engine.concurrency from environment");
        manifest.engine.concurrency = raw.trim().parse().map_err(|_| {
            ConvergeError::Config(ConfigError::validation(
                format!("CONVERGE_CONCURRENCY must be a positive integer, got '{raw}'"),
                "engine.concurrency",
            ))
        })?;
    }

    if let Some(root) = lookup("CONVERGE_PROVIDER_ROOT") {
        debug!("Overriding provider.root from environment");
        manifest.provider.root = Some(root);
    }

    Ok(())
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["converge.yaml", "converge.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConvergeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
