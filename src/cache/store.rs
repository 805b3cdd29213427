/// Persisted fingerprint history
///
/// One JSON document per root scope, at
/// `<database>/<location>/<mapset>/stitches.state.json`. Loaded once per
/// run, mutated in memory and written back atomically at the end.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::fingerprint::Signature;
use crate::workspace::Scope;

pub const STATE_VERSION: u32 = 1;
pub const DEFAULT_STATE_FILE: &str = "stitches.state.json";

/// What a task looked like the last time it was executed or skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub params: String,
    pub scope: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Signature>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Signature>,
    pub skipped: bool,
    #[serde(default)]
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    history: BTreeMap<String, FingerprintRecord>,
}

/// Task identity -> last fingerprint record
#[derive(Debug, Default)]
pub struct StateStore {
    path: Option<PathBuf>,
    history: BTreeMap<String, FingerprintRecord>,
}

impl StateStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Location of the state document for a root scope
    pub fn path_for(scope: &Scope, file_name: &str) -> PathBuf {
        scope.mapset_path().join(file_name)
    }

    /// Load the document at `path`; a missing, unreadable-as-JSON or
    /// outdated document yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let history = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<StateDocument>(&content) {
                Ok(doc) if doc.version == STATE_VERSION => doc.history,
                Ok(doc) => {
                    warn!(
                        path = %path.display(),
                        version = doc.version,
                        "discarding state written by an incompatible version"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable state");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read state: {}", path.display()))
            }
        };

        debug!(path = %path.display(), records = history.len(), "loaded state");

        Ok(Self {
            path: Some(path.to_path_buf()),
            history,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&FingerprintRecord> {
        self.history.get(id)
    }

    pub fn insert(&mut self, id: &str, record: FingerprintRecord) {
        self.history.insert(id.to_string(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<FingerprintRecord> {
        self.history.remove(id)
    }

    /// Drop records for identities not in `ids`
    pub fn retain_ids(&mut self, ids: &BTreeSet<String>) -> usize {
        let before = self.history.len();
        self.history.retain(|id, _| ids.contains(id));
        before - self.history.len()
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &FingerprintRecord)> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Write the document atomically (temp file in the same directory, then rename)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // The mapset is created by GRASS, never here
        if !parent.is_dir() {
            anyhow::bail!("State directory {} does not exist", parent.display());
        }

        let doc = StateDocument {
            version: STATE_VERSION,
            history: self.history.clone(),
        };
        let json = serde_json::to_string_pretty(&doc).context("Failed to serialize state")?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        temp.write_all(json.as_bytes())
            .context("Failed to write state")?;
        temp.persist(path)
            .with_context(|| format!("Failed to persist state: {}", path.display()))?;

        debug!(path = %path.display(), records = self.history.len(), "saved state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::Provenance;
    use tempfile::TempDir;

    fn record(params: &str) -> FingerprintRecord {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "vector/roads@db/loc/PERMANENT".to_string(),
            Signature::Map {
                exists: true,
                provenance: Provenance::Task("0".into()),
            },
        );
        FingerprintRecord {
            params: params.to_string(),
            scope: "scope".to_string(),
            inputs,
            outputs: BTreeMap::new(),
            skipped: false,
            message: "import".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::load(&temp.path().join(DEFAULT_STATE_FILE)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("mapset")).unwrap();
        let path = temp.path().join("mapset").join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path).unwrap();
        store.insert("0", record("abc"));
        store.insert("1/0", record("def"));
        store.save().unwrap();

        let loaded = StateStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("1/0"), store.get("1/0"));
    }

    #[test]
    fn test_save_does_not_create_mapset() {
        let temp = TempDir::new().unwrap();
        let mapset = temp.path().join("nz").join("PERMANENT");

        let mut store = StateStore::load(&mapset.join(DEFAULT_STATE_FILE)).unwrap();
        store.insert("0", record("abc"));
        let err = store.save().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(!temp.path().join("nz").exists());
    }

    #[test]
    fn test_incompatible_version_is_discarded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_STATE_FILE);
        fs::write(&path, r#"{"version": 99, "history": {}}"#).unwrap();
        assert!(StateStore::load(&path).unwrap().is_empty());

        fs::write(&path, "not json").unwrap();
        assert!(StateStore::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_retain_ids() {
        let mut store = StateStore::in_memory();
        store.insert("0", record("a"));
        store.insert("1", record("b"));
        store.insert("2", record("c"));

        let keep: BTreeSet<String> = ["0", "2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(store.retain_ids(&keep), 1);
        assert!(store.get("1").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_in_memory_save_is_noop() {
        let mut store = StateStore::in_memory();
        store.insert("0", record("a"));
        store.save().unwrap();
        assert!(store.path().is_none());
    }
}
