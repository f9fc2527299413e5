//! Change-set types.
//!
//! A [`ChangeSet`] is produced fresh by every planning run and discarded
//! after execution. Entries are listed in the order an operator should read
//! them: deletions first (dependents before dependencies), then creates,
//! updates and no-ops (dependencies before dependents).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{AttrValue, ResourceId};
use crate::state::StateRecord;

use super::diff::AttributeChange;

/// A complete change set.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the declarations this plan is based on.
    pub fingerprint: String,
    /// Planned changes in display order.
    pub changes: Vec<PlannedChange>,
}

/// A single planned change.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// Resource identity.
    pub id: ResourceId,
    /// What to do.
    pub action: Action,
    /// Why.
    pub reason: String,
    /// Desired attributes, possibly holding unresolved references.
    #[serde(skip)]
    pub attributes: BTreeMap<String, AttrValue>,
    /// Resources this change depends on. Desired edges for creates and
    /// updates, recorded edges for deletions.
    pub dependencies: Vec<ResourceId>,
    /// Last-applied record, if any.
    #[serde(skip)]
    pub prior: Option<StateRecord>,
    /// Attribute-level differences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
}

/// Types of actions in a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    Noop,
}

impl Action {
    /// Returns the one-character marker used in plan output.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Noop => " ",
        }
    }
}

impl ChangeSet {
    /// Creates a change set stamped with the current time.
    #[must_use]
    pub fn new(fingerprint: &str, changes: Vec<PlannedChange>) -> Self {
        Self {
            created_at: Utc::now(),
            fingerprint: fingerprint.to_string(),
            changes,
        }
    }

    /// Returns the entries that will call a provider.
    pub fn actionable(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.action != Action::Noop)
    }

    /// Returns true if nothing needs to be done.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.actionable().next().is_none()
    }

    /// Returns the number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    /// Returns the entry for an identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.id == id)
    }

    /// Returns `(action, kind, name, reason)` for each actionable entry.
    #[must_use]
    pub fn summary(&self) -> Vec<(Action, &str, &str, &str)> {
        self.actionable()
            .map(|c| (c.action, c.id.kind.as_str(), c.id.name.as_str(), c.reason.as_str()))
            .collect()
    }
}

impl PlannedChange {
    /// Creates a change with no attributes, dependencies or prior record.
    #[must_use]
    pub fn new(id: ResourceId, action: Action, reason: impl Into<String>) -> Self {
        Self {
            id,
            action,
            reason: reason.into(),
            attributes: BTreeMap::new(),
            dependencies: Vec::new(),
            prior: None,
            changes: Vec::new(),
        }
    }

    /// Returns a human-readable description of the change.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {}", self.id),
            Action::Update => format!("Update {}", self.id),
            Action::Delete => format!("Delete {}", self.id),
            Action::Noop => format!("No change for {}", self.id),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action.symbol(), self.action, self.id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_converged() {
            return write!(f, "No changes required");
        }

        let actionable: Vec<_> = self.actionable().collect();
        writeln!(f, "Change set ({} changes):", actionable.len())?;
        for (i, change) in actionable.iter().enumerate() {
            writeln!(f, "  {}. {change}", i + 1)?;
            for detail in &change.changes {
                writeln!(f, "       {detail}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noops_are_not_actionable() {
        let set = ChangeSet::new(
            "abc",
            vec![
                PlannedChange::new(ResourceId::new("Bucket", "a"), Action::Noop, "up to date"),
                PlannedChange::new(ResourceId::new("Service", "api"), Action::Delete, "removed"),
            ],
        );

        assert!(!set.is_converged());
        assert_eq!(set.actionable().count(), 1);
        assert_eq!(set.summary(), vec![(Action::Delete, "Service", "api", "removed")]);
        assert_eq!(
            set.to_string(),
            "Change set (1 changes):\n  1. - delete Service.api (removed)\n"
        );
    }

    #[test]
    fn test_empty_set_is_converged() {
        let set = ChangeSet::new("abc", Vec::new());
        assert!(set.is_converged());
        assert_eq!(set.to_string(), "No changes required");
    }
}
