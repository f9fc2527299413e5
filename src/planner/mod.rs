//! Planning and execution of change sets.
//!
//! This module diffs the desired graph against recorded state, producing an
//! ordered change set, and applies change sets through a provider.

mod cell;
mod diff;
mod engine;
mod executor;
mod plan;

pub use cell::OutputCells;
pub use diff::{summarize, AttributeChange, ChangeKind, DiffEngine};
pub use engine::Planner;
pub use executor::{ExecutionResult, NodeOutcome, NodeStatus, PlanExecutor};
pub use plan::{Action, ChangeSet, PlannedChange};
