//! State management for applied resources.
//!
//! This module stores one [`StateRecord`] per resource identity. Every write
//! is conditional on the record's current [`Revision`], so two runs racing
//! on the same resource cannot both win.

mod local;
mod lock;
mod memory;
mod store;
mod types;

use std::path::Path;
use std::sync::Arc;

use crate::config::{StateBackend, StateConfig};

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use memory::MemoryStateStore;
pub use store::{check_revision, StateStore};
pub use types::{Revision, StateRecord, STATE_VERSION};

/// Opens the backend named by the manifest.
///
/// A relative `state.path` is resolved against `project_dir`.
#[must_use]
pub fn open_store(config: &StateConfig, project_dir: &Path) -> Arc<dyn StateStore> {
    match config.backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::Local => {
            let dir = config
                .path
                .as_ref()
                .map_or_else(|| project_dir.join(STATE_DIR), |p| project_dir.join(p));
            Arc::new(LocalStateStore::with_base_dir(dir))
        }
    }
}
