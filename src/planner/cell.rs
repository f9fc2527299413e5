//! Write-once output cells.
//!
//! Each resource in a change set gets one cell. Unchanged resources start
//! filled with their recorded outputs; created and updated resources fill
//! theirs exactly once when their provider call succeeds. Dependents read
//! the cells to resolve their references.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::model::{Attributes, Reference, ResourceId};

use super::plan::{Action, ChangeSet};

/// Shared output cells for one run.
#[derive(Debug, Clone, Default)]
pub struct OutputCells {
    cells: Arc<HashMap<ResourceId, OnceCell<Attributes>>>,
}

impl OutputCells {
    /// Creates one cell per entry, pre-filling those of unchanged resources.
    #[must_use]
    pub fn for_changeset(changeset: &ChangeSet) -> Self {
        let cells = changeset
            .changes
            .iter()
            .map(|change| {
                let seed = match change.action {
                    Action::Noop => change.prior.as_ref().map(|r| r.outputs.clone()),
                    _ => None,
                };
                (change.id.clone(), OnceCell::new_with(seed))
            })
            .collect();

        Self {
            cells: Arc::new(cells),
        }
    }

    /// Publishes the outputs of a resource. Returns false if already set.
    pub fn publish(&self, id: &ResourceId, outputs: Attributes) -> bool {
        self.cells
            .get(id)
            .is_some_and(|cell| cell.set(outputs).is_ok())
    }

    /// Returns the outputs of a resource, if published.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Attributes> {
        self.cells.get(id).and_then(OnceCell::get)
    }

    /// Reads the value a reference points at.
    #[must_use]
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.get(&reference.target)
            .and_then(|outputs| outputs.get(&reference.attribute))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedChange;
    use crate::state::StateRecord;
    use serde_json::json;

    #[test]
    fn test_noop_cells_are_seeded() {
        let bucket = ResourceId::new("Bucket", "artifacts");
        let outputs = Attributes::from([(String::from("name"), json!("x"))]);

        let mut noop = PlannedChange::new(bucket.clone(), Action::Noop, "up to date");
        noop.prior = Some(
            StateRecord::new(bucket.clone(), "b-1", outputs.clone(), "h").with_outputs(outputs),
        );
        let create = PlannedChange::new(ResourceId::new("Service", "api"), Action::Create, "new");

        let cells = OutputCells::for_changeset(&ChangeSet::new("fp", vec![noop, create]));

        let reference = Reference::parse("Bucket.artifacts.name").expect("reference");
        assert_eq!(cells.lookup(&reference), Some(json!("x")));
        assert!(cells.get(&ResourceId::new("Service", "api")).is_none());
    }

    #[test]
    fn test_publish_is_write_once() {
        let id = ResourceId::new("Service", "api");
        let cells = OutputCells::for_changeset(&ChangeSet::new(
            "fp",
            vec![PlannedChange::new(id.clone(), Action::Create, "new")],
        ));

        assert!(cells.publish(&id, Attributes::from([(String::from("url"), json!("a"))])));
        assert!(!cells.publish(&id, Attributes::from([(String::from("url"), json!("b"))])));
        assert_eq!(cells.get(&id).map(|o| o["url"].clone()), Some(json!("a")));
        assert!(!cells.publish(&ResourceId::new("Other", "x"), Attributes::new()));
    }
}
