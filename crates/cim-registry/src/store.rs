//! Persisted registry directory.
//!
//! The directory is a single JSON file mapping name → record. All
//! writes go through write-temp-then-rename in the destination
//! directory, so a crash mid-write can never corrupt it and concurrent
//! readers always observe either the prior or the fully updated file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use cim_core::{CiName, CommsError, CommsResult, Endpoint};

/// File-backed store for the registry directory.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Creates a store persisting at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the directory file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the directory from disk.
    ///
    /// A missing file is an empty directory. A malformed file is
    /// treated as empty with a warning; the next save replaces it.
    pub fn load(&self) -> HashMap<CiName, Endpoint> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read registry file");
                return HashMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed registry file, starting empty"
                );
                HashMap::new()
            }
        }
    }

    /// Persists the directory atomically.
    ///
    /// Serializes to a temp file in the same directory, then renames it
    /// over the target. Rename is atomic on the same filesystem.
    pub fn save(&self, directory: &HashMap<CiName, Endpoint>) -> CommsResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(directory)
            .map_err(|e| CommsError::Persist(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| CommsError::Persist(e.to_string()))?;

        debug!(
            path = %self.path.display(),
            endpoints = directory.len(),
            "Registry persisted"
        );
        Ok(())
    }
}
