//! Local file-based state storage backend.
//!
//! Each record lives in its own JSON file under `records/`, so writes to
//! different resources touch different files. A write to one record holds an
//! in-process mutex plus a lock file under `locks/`, which keeps separate
//! processes sharing the directory from interleaving their compare-and-swap.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, StateError};
use crate::model::ResourceId;

use super::lock::{acquire_lock_file, generate_holder_id, LockFileGuard};
use super::store::{check_revision, StateStore};
use super::types::{Revision, StateRecord};

/// Default state directory name.
pub const STATE_DIR: &str = ".converge";

const RECORDS_DIR: &str = "records";
const LOCKS_DIR: &str = "locks";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Identifier written into lock files.
    holder: String,
    /// In-process write serialization per record.
    writers: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Both locks held for one record write.
struct WriteGuard {
    _file: LockFileGuard,
    _local: tokio::sync::OwnedMutexGuard<()>,
}

impl LocalStateStore {
    /// Creates a store rooted at `.converge` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                ConvergeError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            holder: generate_holder_id(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, id: &ResourceId) -> PathBuf {
        self.base_dir.join(RECORDS_DIR).join(format!("{}.json", id.key()))
    }

    fn lock_path(&self, id: &ResourceId) -> PathBuf {
        self.base_dir.join(LOCKS_DIR).join(format!("{}.lock", id.key()))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        for dir in [RECORDS_DIR, LOCKS_DIR] {
            let path = self.base_dir.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                StateError::io(format!("Failed to create state directory {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    async fn lock_record(&self, id: &ResourceId) -> Result<WriteGuard> {
        let local = {
            let mut writers = self.writers.lock().map_err(|_| StateError::Corrupted {
                message: String::from("state writer table poisoned"),
            })?;
            Arc::clone(writers.entry(id.clone()).or_default())
        };
        let local = local.lock_owned().await;

        self.ensure_dirs().await?;
        let file = acquire_lock_file(&self.lock_path(id), id, &self.holder).await?;

        Ok(WriteGuard {
            _file: file,
            _local: local,
        })
    }

    async fn read_record(path: &Path) -> Result<Option<StateRecord>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                let message = format!("Failed to read {}: {e}", path.display());
                return Err(StateError::io(message).into());
            }
        };

        let record = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;
        Ok(Some(record))
    }

    async fn write_record(&self, record: &StateRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::io(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::io(format!("Failed to write temp file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::io(format!("Failed to sync temp file: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::io(format!("Failed to rename temp file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        Self::read_record(&self.record_path(id)).await
    }

    async fn put(
        &self,
        mut record: StateRecord,
        expected: Option<&Revision>,
    ) -> Result<StateRecord> {
        let _guard = self.lock_record(&record.id).await?;

        let current = Self::read_record(&self.record_path(&record.id)).await?;
        check_revision(&record.id, current.as_ref(), expected)?;

        record.revision = Some(Revision::generate());
        record.updated_at = Utc::now();
        self.write_record(&record).await?;

        info!("Saved state for {} (revision {})", record.id, record.revision_label());
        Ok(record)
    }

    async fn delete(&self, id: &ResourceId, expected: &Revision) -> Result<()> {
        let _guard = self.lock_record(id).await?;

        let path = self.record_path(id);
        let current = Self::read_record(&path).await?;
        check_revision(id, current.as_ref(), Some(expected))?;

        fs::remove_file(&path)
            .await
            .map_err(|e| StateError::io(format!("Failed to remove {}: {e}", path.display())))?;

        info!("Removed state for {id}");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StateRecord>> {
        let dir = self.base_dir.join(RECORDS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State directory does not exist: {}", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                let message = format!("Failed to list {}: {e}", dir.display());
                return Err(StateError::io(message).into());
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(format!("Failed to list {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(kind: &str, name: &str) -> StateRecord {
        let attributes = Attributes::from([(String::from("name"), json!(name))]);
        StateRecord::new(ResourceId::new(kind, name), "p-1", attributes, "h")
    }

    #[tokio::test]
    async fn test_missing_record() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());

        assert!(store.get(&ResourceId::new("Bucket", "a")).await.expect("get").is_none());
        assert!(store.list_all().await.expect("list").is_empty());
        assert_eq!(store.backend_type(), "local");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());

        let stored = store.put(record("Bucket", "artifacts"), None).await.expect("put");
        assert!(dir.path().join("records/Bucket.artifacts.json").exists());
        assert!(!dir.path().join("locks/Bucket.artifacts.lock").exists());

        let reopened = LocalStateStore::with_base_dir(dir.path());
        let loaded = reopened.get(&stored.id).await.expect("get").expect("present");
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());

        let first = store.put(record("Bucket", "a"), None).await.expect("put");
        let token = first.revision.clone().expect("revision");

        let (left, right) = tokio::join!(
            store.put(record("Bucket", "a"), Some(&token)),
            store.put(record("Bucket", "a"), Some(&token)),
        );
        let outcomes = [left, right];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| r.as_ref().is_err_and(ConvergeError::is_stale_state)));

        assert!(store.put(record("Bucket", "a"), None).await.is_err());
    }

    #[tokio::test]
    async fn test_two_stores_share_directory() {
        let dir = TempDir::new().expect("tempdir");
        let one = LocalStateStore::with_base_dir(dir.path());
        let two = LocalStateStore::with_base_dir(dir.path());

        let stored = one.put(record("Bucket", "a"), None).await.expect("put");
        let token = stored.revision.clone().expect("revision");

        let (left, right) = tokio::join!(
            one.put(record("Bucket", "a"), Some(&token)),
            two.put(record("Bucket", "a"), Some(&token)),
        );
        assert_ne!(left.is_ok(), right.is_ok());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());

        let bucket = store.put(record("Bucket", "a"), None).await.expect("put");
        store.put(record("Service", "api"), None).await.expect("put");

        let ids: Vec<String> = store
            .list_all()
            .await
            .expect("list")
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["Bucket.a", "Service.api"]);

        store
            .delete(&bucket.id, bucket.revision.as_ref().expect("revision"))
            .await
            .expect("delete");
        assert_eq!(store.list_all().await.expect("list").len(), 1);
    }
}
