//! Per-record lock files for the local state backend.
//!
//! A lock is a small JSON file created with `create_new`, so only one process
//! can hold it. Locks carry an expiry; a lock left behind by a crashed
//! process is taken over once it expires. A lock file that cannot be parsed
//! counts as expired once its modification time is older than the expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StateError;
use crate::model::ResourceId;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 60;

/// Attempts made before giving up on a held lock.
const LOCK_ATTEMPTS: u32 = 50;

/// Pause between attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Information about a record lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Held lock file, removed on drop.
#[derive(Debug)]
pub struct LockFileGuard {
    path: PathBuf,
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}

/// What a lock file on disk looks like from the outside.
#[derive(Debug)]
enum LockState {
    /// No lock file.
    Gone,
    /// Held and not yet expired.
    Live(LockInfo),
    /// Unparseable but recently written, probably mid-write.
    Pending,
    /// Safe to take over, as long as the file still matches the stamp.
    Expired(Stamp),
}

/// Identifies one particular expired lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stamp {
    /// A parseable lock with this id.
    Id(String),
    /// An unparseable lock with these exact contents.
    Raw(Vec<u8>),
}

/// Acquires the lock file at `path`, waiting for a live holder to let go.
///
/// # Errors
///
/// Returns `StateError::LockedByOther` if the lock stays held for the whole
/// retry window.
pub async fn acquire_lock_file(
    path: &Path,
    resource: &ResourceId,
    holder: &str,
) -> Result<LockFileGuard, StateError> {
    let mut last_seen: Option<LockInfo> = None;

    for _ in 0..LOCK_ATTEMPTS {
        match fs::OpenOptions::new().write(true).create_new(true).open(path).await {
            Ok(mut file) => {
                let guard = LockFileGuard {
                    path: path.to_path_buf(),
                };
                let info = LockInfo::new(holder);
                let content = serde_json::to_vec(&info).map_err(|e| {
                    StateError::serialization(format!("Failed to serialize lock: {e}"))
                })?;
                file.write_all(&content)
                    .await
                    .map_err(|e| StateError::io(format!("Failed to write lock file: {e}")))?;
                file.sync_all()
                    .await
                    .map_err(|e| StateError::io(format!("Failed to sync lock file: {e}")))?;
                debug!("Acquired lock {} for {resource}", info.lock_id);
                return Ok(guard);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match inspect_lock_file(path).await? {
                    LockState::Gone => continue,
                    LockState::Live(existing) => last_seen = Some(existing),
                    LockState::Pending => {}
                    LockState::Expired(stamp) => {
                        warn!("Taking over expired lock on {resource}");
                        if !take_over(path, &stamp).await? {
                            debug!("Expired lock on {resource} was replaced, retrying");
                        }
                        continue;
                    }
                }
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(StateError::io(format!(
                    "Failed to create lock file {}: {e}",
                    path.display()
                )));
            }
        }
    }

    Err(StateError::LockedByOther {
        resource: resource.to_string(),
        holder: last_seen
            .as_ref()
            .map_or_else(|| String::from("unknown"), |l| l.holder.clone()),
        since: last_seen
            .as_ref()
            .map_or_else(|| String::from("unknown"), |l| l.acquired_at.to_rfc3339()),
    })
}

async fn inspect_lock_file(path: &Path) -> Result<LockState, StateError> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Gone),
        Err(e) => {
            return Err(StateError::io(format!(
                "Failed to read lock file {}: {e}",
                path.display()
            )));
        }
    };

    if let Ok(info) = serde_json::from_slice::<LockInfo>(&content) {
        if info.is_expired() {
            return Ok(LockState::Expired(Stamp::Id(info.lock_id)));
        }
        return Ok(LockState::Live(info));
    }

    let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Gone),
        Err(e) => {
            return Err(StateError::io(format!(
                "Failed to stat lock file {}: {e}",
                path.display()
            )));
        }
    };
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    if age.as_secs() > LOCK_EXPIRY_SECS.unsigned_abs() {
        Ok(LockState::Expired(Stamp::Raw(content)))
    } else {
        Ok(LockState::Pending)
    }
}

fn stamp_of(content: &[u8]) -> Stamp {
    serde_json::from_slice::<LockInfo>(content)
        .map_or_else(|_| Stamp::Raw(content.to_vec()), |info| Stamp::Id(info.lock_id))
}

/// Removes the lock at `path` only if it is still the lock identified by
/// `stamp`.
///
/// The file is first renamed aside so no other process can swap it in the
/// meantime. If the renamed file turns out to be a newer lock it is linked
/// back into place. Returns whether the stale lock was removed.
async fn take_over(path: &Path, stamp: &Stamp) -> Result<bool, StateError> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".{}.stale", Uuid::new_v4()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(StateError::io(format!(
                "Failed to move expired lock {}: {e}",
                path.display()
            )));
        }
    }

    let content = fs::read(&aside).await.map_err(|e| {
        StateError::io(format!("Failed to read moved lock {}: {e}", aside.display()))
    })?;
    let removed = stamp_of(&content) == *stamp;
    if !removed {
        debug!("Lock {} changed before takeover, restoring it", path.display());
        if let Err(e) = fs::hard_link(&aside, path).await {
            warn!("Failed to restore lock {}: {e}", path.display());
        }
    }
    if let Err(e) = fs::remove_file(&aside).await {
        warn!("Failed to remove moved lock {}: {e}", aside.display());
    }
    Ok(removed)
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().to_string(),
    );

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
