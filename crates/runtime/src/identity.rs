//! Durable device identity cache.
//!
//! The gateway expects a stable device identifier per network path. This
//! cache maps proxy fingerprints to randomly generated device ids, creates
//! ids lazily on first lookup, and persists the mapping as a JSON file so
//! the same identity is presented across process restarts.
//!
//! The cache is constructed explicitly with [`IdentityCache::load`] before
//! any session starts (startup barrier) and shared by reference with every
//! session. Get-or-create is atomic per key: concurrent callers for the
//! same fingerprint converge to one value, and callers for different
//! fingerprints never block each other.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Fingerprint -> device-id store backed by a JSON file.
pub struct IdentityCache {
    path: PathBuf,
    entries: DashMap<String, String>,
    /// Serializes snapshot-and-write so a slow writer cannot clobber a
    /// newer entry with a stale snapshot.
    persist: Mutex<()>,
}

impl IdentityCache {
    /// Loads the cache from `path`, starting empty when the file is missing
    /// or unreadable. Must complete before any session looks up an identity.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => {
                    for (fingerprint, id) in map {
                        entries.insert(fingerprint, id);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "identity store unreadable; starting empty"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "identity store unreadable; starting empty"
                );
            }
        }

        Self {
            path,
            entries,
            persist: Mutex::new(()),
        }
    }

    /// Returns the device id for `fingerprint`, generating and persisting a
    /// fresh one on first use.
    ///
    /// Idempotent: every call for the same fingerprint returns the same id
    /// for the lifetime of the store.
    pub fn get_or_create(&self, fingerprint: &str) -> Result<String> {
        if let Some(existing) = self.entries.get(fingerprint) {
            return Ok(existing.clone());
        }

        let id = {
            let entry = self
                .entries
                .entry(fingerprint.to_string())
                .or_insert_with(|| Uuid::new_v4().to_string());
            entry.value().clone()
        };

        self.save()?;

        tracing::debug!(fingerprint, "device identity resolved");
        Ok(id)
    }

    /// Number of known identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no identity has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the backing store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        // Snapshot under the lock: entries are inserted into the map before
        // save() runs, so the serialized writer always persists a superset
        // of what earlier writers saw.
        let _guard = self.persist.lock();
        let snapshot: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&snapshot)?)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}
