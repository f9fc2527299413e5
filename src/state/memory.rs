//! In-memory state storage backend.
//!
//! Used by tests and by manifests that opt into throwaway state. Each
//! identity has its own async mutex, so writes to different resources never
//! contend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::model::ResourceId;

use super::store::{check_revision, StateStore};
use super::types::{Revision, StateRecord};

type Slot = Arc<tokio::sync::Mutex<Option<StateRecord>>>;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slots: Mutex<HashMap<ResourceId, Slot>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ResourceId, Slot>>> {
        Ok(self.slots.lock().map_err(|_| StateError::Corrupted {
            message: String::from("memory store lock poisoned"),
        })?)
    }

    /// Slot for a write, created on first use.
    fn slot(&self, id: &ResourceId) -> Result<Slot> {
        Ok(Arc::clone(self.slots()?.entry(id.clone()).or_default()))
    }

    /// Slot for a read, if the identity was ever written.
    fn existing_slot(&self, id: &ResourceId) -> Result<Option<Slot>> {
        Ok(self.slots()?.get(id).cloned())
    }

    /// Drops an emptied slot unless another caller still holds it.
    fn prune(&self, id: &ResourceId, slot: &Slot) -> Result<()> {
        let mut slots = self.slots()?;
        // One reference in the map, one held by the caller.
        if Arc::strong_count(slot) == 2
            && slot.try_lock().is_ok_and(|current| current.is_none())
        {
            slots.remove(id);
        }
        Ok(())
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        let Some(slot) = self.existing_slot(id)? else {
            return Ok(None);
        };
        let current = slot.lock().await;
        Ok(current.clone())
    }

    async fn put(
        &self,
        mut record: StateRecord,
        expected: Option<&Revision>,
    ) -> Result<StateRecord> {
        let slot = self.slot(&record.id)?;
        let mut current = slot.lock().await;

        check_revision(&record.id, current.as_ref(), expected)?;

        record.revision = Some(Revision::generate());
        record.updated_at = Utc::now();
        debug!("Stored {} at revision {}", record.id, record.revision_label());
        *current = Some(record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &ResourceId, expected: &Revision) -> Result<()> {
        let Some(slot) = self.existing_slot(id)? else {
            check_revision(id, None, Some(expected))?;
            return Ok(());
        };
        {
            let mut current = slot.lock().await;
            check_revision(id, current.as_ref(), Some(expected))?;
            *current = None;
        }
        self.prune(id, &slot)?;
        debug!("Removed {id}");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StateRecord>> {
        let slots: Vec<Slot> = self.slots()?.values().cloned().collect();

        let mut records = Vec::new();
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::model::Attributes;

    fn record(name: &str) -> StateRecord {
        StateRecord::new(ResourceId::new("Bucket", name), "b-1", Attributes::new(), "h")
    }

    #[tokio::test]
    async fn test_put_assigns_revision() {
        let store = MemoryStateStore::new();
        let stored = store.put(record("a"), None).await.expect("put");
        assert!(stored.revision.is_some());

        let loaded = store.get(&stored.id).await.expect("get").expect("present");
        assert_eq!(loaded.revision, stored.revision);
    }

    #[tokio::test]
    async fn test_concurrent_writers_with_same_token() {
        let store = MemoryStateStore::new();
        let first = store.put(record("a"), None).await.expect("put");
        let token = first.revision.clone().expect("revision");

        let (left, right) = tokio::join!(
            store.put(record("a"), Some(&token)),
            store.put(record("a"), Some(&token)),
        );

        let outcomes = [left, right];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(ConvergeError::State(StateError::Stale { .. })))));
    }

    #[tokio::test]
    async fn test_delete_requires_current_revision() {
        let store = MemoryStateStore::new();
        let stored = store.put(record("a"), None).await.expect("put");
        let old = stored.revision.clone().expect("revision");

        let updated = store.put(record("a"), Some(&old)).await.expect("update");
        assert!(store.delete(&stored.id, &old).await.is_err());

        let current = updated.revision.expect("revision");
        store.delete(&stored.id, &current).await.expect("delete");
        assert!(store.get(&stored.id).await.expect("get").is_none());
        assert!(store.delete(&stored.id, &current).await.is_err());
    }

    #[tokio::test]
    async fn test_list_all_is_sorted() {
        let store = MemoryStateStore::new();
        store.put(record("b"), None).await.expect("put");
        store.put(record("a"), None).await.expect("put");
        let _ = store.get(&ResourceId::new("Bucket", "missing")).await.expect("get");

        let names: Vec<String> = store
            .list_all()
            .await
            .expect("list")
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(names, vec!["Bucket.a", "Bucket.b"]);
    }

    #[tokio::test]
    async fn test_reads_and_deletes_do_not_grow_the_store() {
        let store = MemoryStateStore::new();
        let stored = store.put(record("a"), None).await.expect("put");
        assert_eq!(store.slot_count(), 1);

        for i in 0..10 {
            let missing = ResourceId::new("Bucket", &format!("missing{i}"));
            assert!(store.get(&missing).await.expect("get").is_none());
            let err = store.delete(&missing, &Revision::generate()).await;
            assert!(matches!(err, Err(ConvergeError::State(StateError::Stale { .. }))));
        }
        assert_eq!(store.slot_count(), 1);

        let revision = stored.revision.expect("revision");
        store.delete(&stored.id, &revision).await.expect("delete");
        assert_eq!(store.slot_count(), 0);
        assert!(store.list_all().await.expect("list").is_empty());
    }
}
