//! File-backed inbox queues.
//!
//! Layout: `<root>/<endpoint>/<category>/<seq>_<id>.json`, one file per
//! entry. The sequence number is a zero-padded monotonic counter
//! persisted in `<root>/.seq`, so lexicographic filename order is
//! exactly insertion order and drain order is FIFO even when many
//! entries land within the same second.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use cim_core::{CiName, CommsError, CommsResult};

use crate::entry::{Category, InboxEntry};

/// Name of the per-store sequence counter file.
const SEQ_FILE: &str = ".seq";

/// Per-endpoint message store.
///
/// Destructive operations on one `(endpoint, category)` queue are
/// serialized through a per-queue async mutex, so concurrent pops never
/// return the same entry twice.
pub struct InboxStore {
    root: PathBuf,
    seq_lock: Mutex<()>,
    queue_locks: Mutex<HashMap<(CiName, Category), Arc<Mutex<()>>>>,
}

impl InboxStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq_lock: Mutex::new(()),
            queue_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Appends an entry to a queue and returns its id.
    pub async fn push(
        &self,
        endpoint: &CiName,
        category: Category,
        entry: InboxEntry,
    ) -> CommsResult<Uuid> {
        let seq = self.next_seq().await?;
        let dir = self.queue_dir(endpoint, category);
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| CommsError::Persist(e.to_string()))?;
        let path = dir.join(format!("{seq:020}_{}.json", entry.id));

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| CommsError::Persist(e.to_string()))?;

        debug!(
            endpoint = %endpoint,
            category = %category,
            id = %entry.id,
            seq,
            "Inbox entry appended"
        );
        Ok(entry.id)
    }

    /// Removes and returns the oldest entry in a queue.
    ///
    /// Repeated pops return distinct entries in insertion order and
    /// drain to `None`.
    pub async fn pop(
        &self,
        endpoint: &CiName,
        category: Category,
    ) -> CommsResult<Option<InboxEntry>> {
        let lock = self.queue_lock(endpoint, category).await;
        let _guard = lock.lock().await;

        for path in self.entry_files(endpoint, category) {
            if let Some(entry) = load_entry(&path) {
                std::fs::remove_file(&path)?;
                debug!(endpoint = %endpoint, category = %category, id = %entry.id, "Inbox entry popped");
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Returns the most recently appended entry in a queue.
    ///
    /// With `remove`, deletes that specific entry; older entries are
    /// untouched either way.
    pub async fn read(
        &self,
        endpoint: &CiName,
        category: Category,
        remove: bool,
    ) -> CommsResult<Option<InboxEntry>> {
        let lock = self.queue_lock(endpoint, category).await;
        let _guard = lock.lock().await;

        for path in self.entry_files(endpoint, category).into_iter().rev() {
            if let Some(entry) = load_entry(&path) {
                if remove {
                    std::fs::remove_file(&path)?;
                }
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// All entries in a queue, oldest first. Non-destructive.
    pub async fn list(
        &self,
        endpoint: &CiName,
        category: Category,
    ) -> CommsResult<Vec<InboxEntry>> {
        Ok(self
            .entry_files(endpoint, category)
            .iter()
            .filter_map(|path| load_entry(path))
            .collect())
    }

    /// Number of entries in a queue.
    pub async fn count(&self, endpoint: &CiName, category: Category) -> CommsResult<usize> {
        Ok(self.entry_files(endpoint, category).len())
    }

    /// Removes every entry in a queue, returning the removed count.
    pub async fn clear(&self, endpoint: &CiName, category: Category) -> CommsResult<usize> {
        let lock = self.queue_lock(endpoint, category).await;
        let _guard = lock.lock().await;

        let mut removed = 0;
        for path in self.entry_files(endpoint, category) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(endpoint = %endpoint, category = %category, removed, "Inbox queue cleared");
        }
        Ok(removed)
    }

    /// Directory holding one queue.
    fn queue_dir(&self, endpoint: &CiName, category: Category) -> PathBuf {
        self.root.join(endpoint.as_str()).join(category.as_str())
    }

    /// Entry file paths for a queue, sorted by filename (insertion order).
    fn entry_files(&self, endpoint: &CiName, category: Category) -> Vec<PathBuf> {
        let dir = self.queue_dir(endpoint, category);
        let reader = match std::fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(_) => return Vec::new(),
        };

        let mut paths: Vec<PathBuf> = reader
            .filter_map(|dirent| dirent.ok())
            .map(|dirent| dirent.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        paths
    }

    /// Allocates the next sequence number, persisting the counter.
    async fn next_seq(&self) -> CommsResult<u64> {
        let _guard = self.seq_lock.lock().await;
        std::fs::create_dir_all(&self.root)?;

        let seq_path = self.root.join(SEQ_FILE);
        let prev = std::fs::read_to_string(&seq_path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let next = prev + 1;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(next.to_string().as_bytes())?;
        tmp.flush()?;
        tmp.persist(&seq_path)
            .map_err(|e| CommsError::Persist(e.to_string()))?;
        Ok(next)
    }

    /// Lock guarding destructive operations on one queue.
    async fn queue_lock(&self, endpoint: &CiName, category: Category) -> Arc<Mutex<()>> {
        let mut locks = self.queue_locks.lock().await;
        locks
            .entry((endpoint.clone(), category))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Reads an entry file; a malformed file is skipped with a warning.
fn load_entry(path: &Path) -> Option<InboxEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read inbox entry");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed inbox entry, skipping");
            None
        }
    }
}
