//! Configuration module for the Converge engine.
//!
//! This module handles all manifest-related functionality:
//! - Parsing and deserializing `converge.yaml`
//! - Validation of configuration values
//! - Computing declaration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    EngineConfig, Manifest, ProjectConfig, ProviderConfig, ResourceDecl, StateBackend,
    StateConfig, DEFAULT_CONCURRENCY,
};
pub use parser::{apply_overrides, find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, MAX_CONCURRENCY};
pub use hash::DeclarationHasher;
