//! The persistent embedding store: a single MessagePack file holding
//! every indexed spell's vector plus the lifecycle manager's singleton
//! metadata block.
//!
//! Saves are atomic: encode to a temp file in the same directory, fsync,
//! rename over the target, then (on POSIX) chmod it to 0600. Loads never
//! fail startup — any parse error degrades to an empty in-memory store.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use grimoire_domain::error::{Error, Result};

pub const CURRENT_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub hash: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageEntry {
    pub last_used_turn: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LifecycleMetadata {
    pub current_turn: u64,
    pub usage_tracking: HashMap<String, UsageEntry>,
    pub active_pids: HashMap<String, u32>,
    pub last_saved: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: String,
    model_name: String,
    dimension: usize,
    spells: HashMap<String, EmbeddingRecord>,
    #[serde(default)]
    lifecycle: Option<LifecycleMetadata>,
}

impl StoreFile {
    fn empty(model_name: &str, dimension: usize) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            model_name: model_name.to_string(),
            dimension,
            spells: HashMap::new(),
            lifecycle: Some(LifecycleMetadata::default()),
        }
    }
}

/// `StoreFile` without the `lifecycle` field, used as a fallback parse
/// target when the full struct fails to deserialize: any unrecognized or
/// ill-typed `lifecycle` value is skipped (not type-checked) by serde's
/// unknown-field handling, so a malformed `lifecycle` block can never
/// take `spells` down with it.
#[derive(Debug, Clone, Deserialize)]
struct StoreFileCore {
    #[serde(default = "default_version")]
    version: String,
    model_name: String,
    dimension: usize,
    spells: HashMap<String, EmbeddingRecord>,
}

fn default_version() -> String {
    CURRENT_VERSION.to_string()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Parses `bytes` per §4.2's degrade-by-field rule: a malformed or
/// missing `lifecycle` block resets only `lifecycle` (to empty defaults,
/// `last_saved = now`) and preserves `spells`; only a parse failure that
/// also breaks the core fields (`spells`/`version`/`model_name`/
/// `dimension`) degrades the whole store to empty.
fn parse_store_file(bytes: &[u8], path: &Path, model_name: &str, dimension: usize) -> StoreFile {
    match rmp_serde::from_slice::<StoreFile>(bytes) {
        Ok(mut parsed) => {
            if parsed.lifecycle.is_none() {
                tracing::info!(path = %path.display(), "upgrading store without lifecycle block");
                parsed.lifecycle = Some(LifecycleMetadata::default());
            }
            parsed.version = CURRENT_VERSION.to_string();
            parsed
        }
        Err(full_err) => match rmp_serde::from_slice::<StoreFileCore>(bytes) {
            Ok(core) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %full_err,
                    "lifecycle block malformed, resetting it to empty defaults and preserving spells"
                );
                StoreFile {
                    version: CURRENT_VERSION.to_string(),
                    model_name: core.model_name,
                    dimension: core.dimension,
                    spells: core.spells,
                    lifecycle: Some(LifecycleMetadata {
                        last_saved: now_millis(),
                        ..LifecycleMetadata::default()
                    }),
                }
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), error = %full_err, "store corrupt, degrading to empty");
                StoreFile::empty(model_name, dimension)
            }
        },
    }
}

/// Persistent, versioned, corruption-tolerant embedding store.
pub struct EmbeddingStore {
    path: PathBuf,
    model_name: String,
    dimension: usize,
    inner: RwLock<StoreFile>,
}

impl EmbeddingStore {
    /// Loads the store from `path`, or starts empty if the file does not
    /// exist or cannot be parsed.
    pub fn load(path: impl Into<PathBuf>, model_name: &str, dimension: usize) -> Self {
        let path = path.into();
        let file = match std::fs::read(&path) {
            Ok(bytes) => parse_store_file(&bytes, &path, model_name, dimension),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                StoreFile::empty(model_name, dimension)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not read store, degrading to empty");
                StoreFile::empty(model_name, dimension)
            }
        };
        Self {
            path,
            model_name: model_name.to_string(),
            dimension,
            inner: RwLock::new(file),
        }
    }

    pub fn get(&self, name: &str) -> Option<EmbeddingRecord> {
        self.inner.read().spells.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.read().spells.contains_key(name)
    }

    pub fn set(&self, name: &str, vector: Vec<f32>, hash: String, timestamp: i64) {
        self.inner.write().spells.insert(
            name.to_string(),
            EmbeddingRecord {
                vector,
                hash,
                timestamp,
            },
        );
    }

    pub fn delete(&self, name: &str) -> bool {
        self.inner.write().spells.remove(name).is_some()
    }

    pub fn get_all(&self) -> HashMap<String, EmbeddingRecord> {
        self.inner.read().spells.clone()
    }

    /// True if `name` is unknown, or its stored hash differs from `hash`.
    pub fn needs_update(&self, name: &str, hash: &str) -> bool {
        match self.inner.read().spells.get(name) {
            Some(record) => record.hash != hash,
            None => true,
        }
    }

    pub fn get_lifecycle_metadata(&self) -> Option<LifecycleMetadata> {
        self.inner.read().lifecycle.clone()
    }

    pub fn set_lifecycle_metadata(&self, metadata: LifecycleMetadata) {
        self.inner.write().lifecycle = Some(metadata);
    }

    /// Merges `partial` over the current metadata (or over defaults if
    /// none is set yet).
    pub fn update_lifecycle_metadata(&self, f: impl FnOnce(&mut LifecycleMetadata)) {
        let mut guard = self.inner.write();
        let metadata = guard.lifecycle.get_or_insert_with(LifecycleMetadata::default);
        f(metadata);
    }

    /// Serializes the current state to a temp file beside `path`, fsyncs
    /// it, renames it over `path`, then (POSIX) restricts permissions to
    /// 0600. Never leaves a partially written file at `path`.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.inner.read().clone();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = rmp_serde::to_vec_named(&snapshot)
            .map_err(|err| Error::PersistenceError(err.to_string()))?;

        let tmp_path = self.tmp_path();
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        set_owner_only_permissions(&self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.path.with_file_name(format!("{file_name}.tmp"))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::load(tmp_file(&dir, "store.msgpack"), "m", 384);
        assert!(store.get_all().is_empty());
        assert_eq!(store.get_lifecycle_metadata().unwrap(), LifecycleMetadata::default());
    }

    #[test]
    fn save_then_load_roundtrips_spells() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "store.msgpack");
        let store = EmbeddingStore::load(&path, "m", 3);
        store.set("weather", vec![1.0, 2.0, 3.0], "abc".into(), 100);
        store.save().unwrap();

        let reloaded = EmbeddingStore::load(&path, "m", 3);
        let record = reloaded.get("weather").unwrap();
        assert_eq!(record.vector, vec![1.0, 2.0, 3.0]);
        assert_eq!(record.hash, "abc");
    }

    #[test]
    fn needs_update_true_for_unknown_and_changed_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::load(tmp_file(&dir, "s.msgpack"), "m", 2);
        assert!(store.needs_update("new-spell", "h1"));
        store.set("new-spell", vec![0.1, 0.2], "h1".into(), 0);
        assert!(!store.needs_update("new-spell", "h1"));
        assert!(store.needs_update("new-spell", "h2"));
    }

    #[test]
    fn corrupt_bytes_degrade_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "corrupt.msgpack");
        std::fs::write(&path, b"not valid msgpack at all, just garbage bytes").unwrap();
        let store = EmbeddingStore::load(&path, "m", 384);
        assert!(store.get_all().is_empty());
    }

    #[derive(Serialize)]
    struct StoreFileWithBadLifecycle {
        version: String,
        model_name: String,
        dimension: usize,
        spells: HashMap<String, EmbeddingRecord>,
        lifecycle: String,
    }

    #[test]
    fn valid_spells_with_malformed_lifecycle_preserves_spells_and_resets_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "bad-lifecycle.msgpack");

        let mut spells = HashMap::new();
        spells.insert(
            "weather".to_string(),
            EmbeddingRecord {
                vector: vec![1.0, 2.0, 3.0],
                hash: "abc".into(),
                timestamp: 100,
            },
        );
        let bad_file = StoreFileWithBadLifecycle {
            version: CURRENT_VERSION.to_string(),
            model_name: "m".into(),
            dimension: 3,
            spells,
            // Wrong shape: a string where a `LifecycleMetadata` map is
            // expected, simulating a malformed (not merely absent) block.
            lifecycle: "not a lifecycle object".into(),
        };
        let bytes = rmp_serde::to_vec_named(&bad_file).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let store = EmbeddingStore::load(&path, "m", 3);
        let record = store.get("weather").unwrap();
        assert_eq!(record.vector, vec![1.0, 2.0, 3.0]);
        assert_eq!(record.hash, "abc");

        let metadata = store.get_lifecycle_metadata().unwrap();
        assert_eq!(metadata.current_turn, 0);
        assert!(metadata.usage_tracking.is_empty());
        assert!(metadata.last_saved > 0);
    }

    #[test]
    fn lifecycle_metadata_updates_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::load(tmp_file(&dir, "s.msgpack"), "m", 2);
        store.update_lifecycle_metadata(|m| m.current_turn = 5);
        store.update_lifecycle_metadata(|m| {
            m.usage_tracking.insert(
                "weather".into(),
                UsageEntry { last_used_turn: 5 },
            );
        });
        let metadata = store.get_lifecycle_metadata().unwrap();
        assert_eq!(metadata.current_turn, 5);
        assert_eq!(metadata.usage_tracking.get("weather").unwrap().last_used_turn, 5);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::load(tmp_file(&dir, "s.msgpack"), "m", 2);
        store.set("weather", vec![0.1, 0.2], "h".into(), 0);
        assert!(store.delete("weather"));
        assert!(!store.has("weather"));
        assert!(!store.delete("weather"));
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "perms.msgpack");
        let store = EmbeddingStore::load(&path, "m", 2);
        store.set("x", vec![0.1, 0.2], "h".into(), 0);
        store.save().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
