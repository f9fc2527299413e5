// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A declarative resource-dependency provisioner.
//!
//! ## Overview
//!
//! Converge reads a set of resource declarations, links them into a
//! dependency graph through the references between their attributes, and
//! converges real resources to the declared state:
//!
//! - Declarations are checked for cycles and dangling references before
//!   anything is touched
//! - A plan is computed against recorded state and can be reviewed first
//! - Independent resources are applied concurrently, dependents wait for
//!   the outputs they consume
//! - A failed resource only blocks its own dependents; re-running resumes
//!
//! ## Architecture
//!
//! 1. **Graph**: declarations become an acyclic graph of [`model::ResourceNode`]s
//! 2. **Planner**: the graph is diffed against [`state::StateRecord`]s into a
//!    [`planner::ChangeSet`]
//! 3. **Executor**: the change set is applied through a [`provider::Provider`],
//!    recording each result with a conditional write
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing and validation
//! - [`model`]: Resource identities, attribute values and references
//! - [`graph`]: Dependency graph construction and cycle detection
//! - [`planner`]: Change planning and concurrent execution
//! - [`state`]: State storage backends (memory, local)
//! - [`provider`]: Provider capability and the filesystem provider
//! - [`reconciler`]: End-to-end runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: nl-to-iac
//!
//! resources:
//!   - kind: Bucket
//!     name: artifacts
//!     attributes:
//!       name: nl-to-iac-artifacts
//!
//!   - kind: Service
//!     name: api
//!     attributes:
//!       bucket: "${Bucket.artifacts.name}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeclarationHasher, Manifest, ResourceDecl};
pub use error::{ConvergeError, Result};
pub use graph::{Graph, GraphBuilder};
pub use model::{AttrValue, Attributes, Reference, ResourceId};
pub use planner::{ChangeSet, ExecutionResult, PlanExecutor, Planner};
pub use provider::{LocalProvider, Provider, ProviderRegistry};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, MemoryStateStore, StateRecord, StateStore};
