//! Dependency graph construction.
//!
//! This module parses declarations into an acyclic graph of resources,
//! linking each resource to the resources whose outputs it consumes.

mod builder;
mod dag;

pub use builder::GraphBuilder;
pub use dag::{compute_depths, find_cycle, order_by_depth, EdgeMap, Graph};
