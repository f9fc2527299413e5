//! Resource identities and graph nodes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::value::{AttrValue, Reference};

/// Resolved attribute bag, keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identity of a resource: its kind plus its logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind (e.g. `Bucket`).
    pub kind: String,
    /// Logical name, unique per kind.
    pub name: String,
}

/// Whether a declared resource should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The resource must exist with the declared attributes.
    #[default]
    Present,
    /// Any recorded instance of the resource must be deleted.
    Absent,
}

/// A desired resource within a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Resource identity.
    pub id: ResourceId,
    /// Desired presence.
    pub ensure: Ensure,
    /// Attribute values, possibly holding references.
    pub attributes: BTreeMap<String, AttrValue>,
    /// Every dependency: explicit edges plus reference targets.
    pub depends_on: BTreeSet<ResourceId>,
}

impl ResourceId {
    /// Creates a new identity.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Key usable as a file stem (`Kind.name`).
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

/// Checks that a kind is a letter followed by ASCII alphanumerics or `_`.
#[must_use]
pub fn is_valid_kind(kind: &str) -> bool {
    let mut chars = kind.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks that a logical name is non-empty ASCII alphanumerics, `-` or `_`.
#[must_use]
pub fn is_valid_resource_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("'{s}' is not of the form Kind.name"))?;

        if !is_valid_kind(kind) {
            return Err(format!("invalid resource kind '{kind}'"));
        }
        if !is_valid_resource_name(name) {
            return Err(format!("invalid resource name '{name}'"));
        }

        Ok(Self::new(kind, name))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl ResourceNode {
    /// Returns every reference held by the node's attributes, in key order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Returns true if the node should exist after convergence.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.ensure == Ensure::Present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity() {
        let id: ResourceId = "Bucket.artifacts".parse().expect("valid identity");
        assert_eq!(id.kind, "Bucket");
        assert_eq!(id.name, "artifacts");
        assert_eq!(id.to_string(), "Bucket.artifacts");
    }

    #[test]
    fn test_reject_malformed_identity() {
        assert!("Bucket".parse::<ResourceId>().is_err());
        assert!("1Bucket.x".parse::<ResourceId>().is_err());
        assert!("Bucket.bad name".parse::<ResourceId>().is_err());
        assert!("Bucket.a.b".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let id = ResourceId::new("Service", "api");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"Service.api\"");

        let back: ResourceId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
