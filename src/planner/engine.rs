//! Planning: desired graph versus recorded state.
//!
//! Nodes are visited dependencies-first. Outputs of nodes that stay
//! unchanged are known at plan time and are used to resolve the references
//! of their dependents; everything downstream of a create or update is
//! "known after apply". Records with no desired node are deleted,
//! dependents before dependencies.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::DeclarationHasher;
use crate::error::PlanError;
use crate::graph::{compute_depths, order_by_depth, EdgeMap, Graph};
use crate::model::{resolve_attributes, Attributes, Reference, ResourceId, ResourceNode};
use crate::state::StateRecord;

use super::diff::{summarize, DiffEngine};
use super::plan::{Action, ChangeSet, PlannedChange};

/// Produces change sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner {
    hasher: DeclarationHasher,
    diff: DiffEngine,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: DeclarationHasher::new(),
            diff: DiffEngine::new(),
        }
    }

    /// Plans the changes that bring `records` to `graph`.
    ///
    /// # Errors
    ///
    /// Returns `DependsOnDeleted` if a present resource depends on one
    /// declared absent, and `UnknownOutput` if a reference names an output an
    /// unchanged resource does not have.
    pub fn plan(
        &self,
        graph: &Graph,
        records: &[StateRecord],
        fingerprint: &str,
    ) -> Result<ChangeSet, PlanError> {
        let by_id: BTreeMap<&ResourceId, &StateRecord> =
            records.iter().map(|r| (&r.id, r)).collect();

        let mut known: HashMap<&ResourceId, &Attributes> = HashMap::new();
        let mut forward = Vec::new();
        let mut doomed: Vec<&StateRecord> = Vec::new();

        for node in graph.topological_order() {
            let record = by_id.get(&node.id).copied();

            if !node.is_present() {
                match record {
                    Some(r) => doomed.push(r),
                    None => forward.push(PlannedChange::new(
                        node.id.clone(),
                        Action::Noop,
                        "already absent",
                    )),
                }
                continue;
            }

            if let Some(target) = node
                .depends_on
                .iter()
                .find(|dep| graph.get(dep).is_some_and(|n| !n.is_present()))
            {
                return Err(PlanError::DependsOnDeleted {
                    resource: node.id.to_string(),
                    target: target.to_string(),
                });
            }

            let (change, outputs_known) = self.plan_node(node, record, &known)?;
            if outputs_known && let Some(r) = record {
                known.insert(&node.id, &r.outputs);
            }
            debug!("Planned {change}");
            forward.push(change);
        }

        doomed.extend(records.iter().filter(|r| !graph.contains(&r.id)));

        let mut changes = Self::plan_deletions(&doomed, graph);
        changes.extend(forward);

        Ok(ChangeSet::new(fingerprint, changes))
    }

    /// Plans the deletion of every record.
    #[must_use]
    pub fn plan_destroy(&self, records: &[StateRecord], fingerprint: &str) -> ChangeSet {
        let all: Vec<&StateRecord> = records.iter().collect();
        let mut changes = Self::plan_deletions(&all, &Graph::default());
        for change in &mut changes {
            change.reason = String::from("destroy requested");
        }
        ChangeSet::new(fingerprint, changes)
    }

    /// Plans one present node. The flag is true when the recorded outputs
    /// stay valid for dependents.
    fn plan_node(
        &self,
        node: &ResourceNode,
        record: Option<&StateRecord>,
        known: &HashMap<&ResourceId, &Attributes>,
    ) -> Result<(PlannedChange, bool), PlanError> {
        let mut pending: BTreeSet<String> = BTreeSet::new();
        for reference in node.references() {
            match known.get(&reference.target) {
                Some(outputs) if !outputs.contains_key(&reference.attribute) => {
                    return Err(PlanError::UnknownOutput {
                        resource: node.id.to_string(),
                        reference: reference.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    pending.insert(reference.to_string());
                }
            }
        }

        let lookup = |r: &Reference| -> Option<Value> {
            known.get(&r.target).and_then(|outputs| outputs.get(&r.attribute)).cloned()
        };

        let mut change = PlannedChange::new(node.id.clone(), Action::Noop, "");
        change.attributes = node.attributes.clone();
        change.dependencies = node.depends_on.iter().cloned().collect();
        change.prior = record.cloned();

        let Some(record) = record else {
            change.action = Action::Create;
            change.reason = String::from("not in state");
            return Ok((change, false));
        };

        if !pending.is_empty() {
            change.action = Action::Update;
            change.changes = self.diff.diff_partial(&record.attributes, &node.attributes, &lookup);
            change.reason = format!(
                "input known after apply: {}",
                pending.into_iter().collect::<Vec<_>>().join(", ")
            );
            return Ok((change, false));
        }

        let resolved = resolve_attributes(&node.attributes, &lookup).map_err(|r| {
            PlanError::UnknownOutput {
                resource: node.id.to_string(),
                reference: r.to_string(),
            }
        })?;

        let hash = self.hasher.hash_attributes(&resolved);
        if !DeclarationHasher::hashes_match(&hash, &record.attributes_hash) {
            change.action = Action::Update;
            change.changes = self.diff.diff(&record.attributes, &resolved);
            change.reason = summarize(&change.changes);
            if change.reason.is_empty() {
                change.reason = String::from("attribute hash changed");
            }
            return Ok((change, false));
        }

        // Recorded edges drive deletion order, so an edge-only change is an update.
        if let Some(reason) = dependency_changes(&record.dependencies, &node.depends_on) {
            change.action = Action::Update;
            change.reason = reason;
        } else {
            change.reason = String::from("up to date");
        }
        Ok((change, true))
    }

    /// Orders deletions so every record goes before the records it depends on.
    fn plan_deletions(doomed: &[&StateRecord], graph: &Graph) -> Vec<PlannedChange> {
        let edges: EdgeMap = doomed
            .iter()
            .map(|r| (r.id.clone(), r.dependencies.iter().cloned().collect()))
            .collect();
        let depths = compute_depths(&edges);
        let by_id: HashMap<&ResourceId, &StateRecord> =
            doomed.iter().map(|r| (&r.id, *r)).collect();

        order_by_depth(&depths, true)
            .into_iter()
            .filter_map(|id| {
                let record = by_id.get(&id)?;
                let reason = if graph.contains(&id) {
                    "declared absent"
                } else {
                    "no longer declared"
                };
                let mut change = PlannedChange::new(id, Action::Delete, reason);
                change.dependencies.clone_from(&record.dependencies);
                change.prior = Some((*record).clone());
                Some(change)
            })
            .collect()
    }
}

/// Describes how the desired edges differ from the recorded ones.
fn dependency_changes(recorded: &[ResourceId], desired: &BTreeSet<ResourceId>) -> Option<String> {
    let recorded: BTreeSet<&ResourceId> = recorded.iter().collect();
    let desired: BTreeSet<&ResourceId> = desired.iter().collect();
    if recorded == desired {
        return None;
    }

    let mut parts: Vec<String> = desired
        .difference(&recorded)
        .map(|id| format!("+{id}"))
        .collect();
    parts.extend(recorded.difference(&desired).map(|id| format!("-{id}")));
    Some(format!("dependencies changed: {}", parts.join(", ")))
}
