//! Snapshot persistence
//!
//! The whole ledger state lives in one pretty-printed JSON document:
//!
//! - `tx_store` - committed transactions keyed by id
//! - `chain` - blocks in index order
//! - `signing_key` - hex HMAC key for payload signing
//!
//! Saves write `<path>.tmp` and rename it over `<path>`, so a crash
//! leaves either the previous or the new snapshot on disk. A snapshot
//! that fails to parse is moved aside to `<path>.corrupt-<timestamp>`
//! and the ledger starts empty.

use crate::error::{Error, Result};
use crate::types::{Block, Transaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Persisted ledger state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Transactions by id
    #[serde(default)]
    pub tx_store: HashMap<Uuid, Transaction>,

    /// Block chain
    #[serde(default)]
    pub chain: Vec<Block>,

    /// Hex signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

/// How a load went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Snapshot parsed
    Loaded,
    /// No file at the path
    Missing,
    /// Unparseable file moved to the given path
    Quarantined(PathBuf),
}

/// JSON snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        PathBuf::from(name)
    }

    /// Load the snapshot; missing or corrupt files yield an empty one
    pub fn load(&self) -> Result<(Snapshot, LoadOutcome)> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = ?self.path, "No snapshot found, starting empty");
                return Ok((Snapshot::default(), LoadOutcome::Missing));
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Snapshot>(&content) {
            Ok(snapshot) => {
                tracing::info!(
                    path = ?self.path,
                    transactions = snapshot.tx_store.len(),
                    blocks = snapshot.chain.len(),
                    "Snapshot loaded"
                );
                Ok((snapshot, LoadOutcome::Loaded))
            }
            Err(parse_err) => {
                let quarantine = self.quarantine_path();
                std::fs::rename(&self.path, &quarantine).map_err(|rename_err| {
                    Error::CorruptSnapshot {
                        path: self.path.clone(),
                        reason: format!("{}; quarantine failed: {}", parse_err, rename_err),
                    }
                })?;
                tracing::error!(
                    path = ?self.path,
                    quarantine = ?quarantine,
                    error = %parse_err,
                    "Corrupt snapshot moved aside, starting empty"
                );
                Ok((Snapshot::default(), LoadOutcome::Quarantined(quarantine)))
            }
        }
    }

    /// Atomically replace the snapshot
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let encoded = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.tmp_path();
        let mut file = File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Storage(format!("Failed to move {:?} into place: {}", tmp, e))
        })?;
        sync_parent_dir(&self.path)?;

        tracing::debug!(
            path = ?self.path,
            blocks = snapshot.chain.len(),
            "Snapshot saved"
        );
        Ok(())
    }
}

/// Flush the directory holding `path`
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => Ok(File::open(parent)?.sync_all()?),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SnapshotStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("nested").join("store.json"));
        (store, temp_dir)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (store, _temp) = test_store();
        let (snapshot, outcome) = store.load().unwrap();
        assert!(snapshot.tx_store.is_empty());
        assert!(snapshot.chain.is_empty());
        assert_eq!(outcome, LoadOutcome::Missing);
    }

    #[test]
    fn test_save_then_load() {
        let (store, _temp) = test_store();
        let snapshot = Snapshot {
            signing_key: Some("ab".repeat(32)),
            ..Snapshot::default()
        };
        store.save(&snapshot).unwrap();
        assert!(!store.tmp_path().exists());

        let (loaded, outcome) = store.load().unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(loaded.signing_key, snapshot.signing_key);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let (store, _temp) = test_store();
        store.save(&Snapshot::default()).unwrap();
        let newer = Snapshot {
            signing_key: Some("cd".repeat(32)),
            ..Snapshot::default()
        };
        store.save(&newer).unwrap();
        assert!(!store.tmp_path().exists());

        let on_disk: Snapshot =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk.signing_key, newer.signing_key);
    }

    #[test]
    fn test_legacy_snapshot_without_key() {
        let (store, _temp) = test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"tx_store": {}, "chain": []}"#).unwrap();

        let (loaded, outcome) = store.load().unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert!(loaded.signing_key.is_none());
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let (store, _temp) = test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();

        let (snapshot, outcome) = store.load().unwrap();
        assert!(snapshot.chain.is_empty());

        let LoadOutcome::Quarantined(moved) = outcome else {
            panic!("expected quarantine, got {:?}", outcome);
        };
        assert!(moved.exists());
        assert!(!store.path().exists());
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("store.json.corrupt-"));
        assert_eq!(std::fs::read(&moved).unwrap(), b"{ not json");
    }
}
