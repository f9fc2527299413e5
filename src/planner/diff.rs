//! Attribute-level diffing.
//!
//! Compares the attributes recorded at the last apply with the desired ones
//! and reports each key that was added, removed or changed. Keys whose new
//! value depends on a resource not yet applied are reported as unknown.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{AttrValue, Attributes, Reference};

/// How one attribute differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Key is new.
    Added,
    /// Key was dropped.
    Removed,
    /// Value changed.
    Modified,
    /// New value is known only after a dependency is applied.
    Unknown,
}

/// Difference for a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub key: String,
    /// Type of difference.
    pub kind: ChangeKind,
    /// Recorded value.
    pub old: Option<Value>,
    /// Desired value, if known.
    pub new: Option<Value>,
}

/// Engine for computing attribute diffs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Diffs two fully resolved attribute bags.
    #[must_use]
    pub fn diff(&self, old: &Attributes, new: &Attributes) -> Vec<AttributeChange> {
        let mut changes = Vec::new();

        for (key, new_value) in new {
            match old.get(key) {
                None => changes.push(AttributeChange {
                    key: key.clone(),
                    kind: ChangeKind::Added,
                    old: None,
                    new: Some(new_value.clone()),
                }),
                Some(old_value) if old_value != new_value => changes.push(AttributeChange {
                    key: key.clone(),
                    kind: ChangeKind::Modified,
                    old: Some(old_value.clone()),
                    new: Some(new_value.clone()),
                }),
                Some(_) => {}
            }
        }

        changes.extend(old.iter().filter(|(key, _)| !new.contains_key(*key)).map(
            |(key, old_value)| AttributeChange {
                key: key.clone(),
                kind: ChangeKind::Removed,
                old: Some(old_value.clone()),
                new: None,
            },
        ));

        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }

    /// Diffs recorded attributes against desired ones that may still hold
    /// unresolved references.
    ///
    /// Keys that `lookup` can resolve are compared normally; the rest are
    /// reported as [`ChangeKind::Unknown`].
    #[must_use]
    pub fn diff_partial<F>(
        &self,
        old: &Attributes,
        desired: &BTreeMap<String, AttrValue>,
        lookup: &F,
    ) -> Vec<AttributeChange>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let mut resolved = Attributes::new();
        let mut unknown = Vec::new();

        for (key, value) in desired {
            match value.resolve(lookup) {
                Ok(v) => {
                    resolved.insert(key.clone(), v);
                }
                Err(_) => unknown.push(key.clone()),
            }
        }

        // Compare only what is known; unknown keys are neither added nor removed.
        let known_old: Attributes = old
            .iter()
            .filter(|(key, _)| !unknown.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut changes = self.diff(&known_old, &resolved);
        changes.extend(unknown.into_iter().map(|key| AttributeChange {
            old: old.get(&key).cloned(),
            key,
            kind: ChangeKind::Unknown,
            new: None,
        }));

        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }
}

/// Summarizes changes as `changed: a, b; added: c`.
#[must_use]
pub fn summarize(changes: &[AttributeChange]) -> String {
    let groups = [
        (ChangeKind::Modified, "changed"),
        (ChangeKind::Added, "added"),
        (ChangeKind::Removed, "removed"),
        (ChangeKind::Unknown, "known after apply"),
    ];

    groups
        .iter()
        .filter_map(|(kind, label)| {
            let keys: Vec<&str> = changes
                .iter()
                .filter(|c| c.kind == *kind)
                .map(|c| c.key.as_str())
                .collect();
            (!keys.is_empty()).then(|| format!("{label}: {}", keys.join(", ")))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(String::new, ToString::to_string);
        match self.kind {
            ChangeKind::Added => write!(f, "+ {} = {}", self.key, show(&self.new)),
            ChangeKind::Removed => write!(f, "- {} = {}", self.key, show(&self.old)),
            ChangeKind::Modified => {
                write!(f, "~ {}: {} -> {}", self.key, show(&self.old), show(&self.new))
            }
            ChangeKind::Unknown => write!(f, "~ {} = (known after apply)", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_identical_bags_have_no_changes() {
        let a = attrs(&[("name", json!("x")), ("size", json!(3))]);
        assert!(DiffEngine::new().diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_added_removed_modified() {
        let old = attrs(&[("name", json!("x")), ("region", json!("eu"))]);
        let new = attrs(&[("name", json!("y")), ("tier", json!("gold"))]);

        let changes = DiffEngine::new().diff(&old, &new);
        let kinds: Vec<_> = changes.iter().map(|c| (c.key.as_str(), c.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("name", ChangeKind::Modified),
                ("region", ChangeKind::Removed),
                ("tier", ChangeKind::Added),
            ]
        );
        assert_eq!(summarize(&changes), "changed: name; added: tier; removed: region");
    }

    #[test]
    fn test_partial_diff_marks_unresolved_keys() {
        let old = attrs(&[("bucket", json!("x")), ("port", json!(80))]);
        let mut desired = BTreeMap::new();
        desired.insert(
            String::from("bucket"),
            AttrValue::parse(&json!("${Bucket.artifacts.name}")).expect("parse"),
        );
        desired.insert(String::from("port"), AttrValue::Literal(json!(8080)));

        let changes = DiffEngine::new().diff_partial(&old, &desired, &|_| None);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Unknown);
        assert_eq!(changes[0].old, Some(json!("x")));
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[0].to_string(), "~ bucket = (known after apply)");
    }
}
