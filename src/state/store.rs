//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Every write is a compare-and-swap against the record's revision token.

use async_trait::async_trait;

use crate::error::{Result, StateError};
use crate::model::ResourceId;

use super::types::{Revision, StateRecord};

/// Trait for state storage backends.
///
/// Writes to one identity are serialized; writes to different identities
/// never block each other.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Gets the record for an identity, if any.
    async fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>>;

    /// Stores a record if the current revision matches `expected`.
    ///
    /// `expected = None` requires that no record exists yet. On success the
    /// stored record, carrying its new revision, is returned.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Stale` if another writer got there first.
    async fn put(&self, record: StateRecord, expected: Option<&Revision>) -> Result<StateRecord>;

    /// Removes a record if its current revision matches `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Stale` if the record changed or is already gone.
    async fn delete(&self, id: &ResourceId, expected: &Revision) -> Result<()>;

    /// Lists every record, ordered by identity.
    async fn list_all(&self) -> Result<Vec<StateRecord>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Compares the stored revision with the one a writer expects.
///
/// # Errors
///
/// Returns `StateError::Stale` on mismatch.
pub fn check_revision(
    id: &ResourceId,
    current: Option<&StateRecord>,
    expected: Option<&Revision>,
) -> std::result::Result<(), StateError> {
    let found = current.and_then(|r| r.revision.as_ref());
    let exists = current.is_some();

    let matches = match (exists, expected) {
        (false, None) => true,
        (true, Some(want)) => found == Some(want),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(StateError::Stale {
            resource: id.to_string(),
            expected: expected.map_or_else(|| String::from("none"), ToString::to_string),
            found: current.map_or_else(|| String::from("none"), StateRecord::revision_label),
        })
    }
}
