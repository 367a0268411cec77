//! The secondary `.env`-like credential store consulted by
//! [`crate::env::expand_env_var`] when a `${VAR}` placeholder isn't set in
//! the process environment.
//!
//! Mirrors the teacher's OAuth token store (`~/.serialagent/oauth-tokens.json`)
//! in spirit — a single file under the user's home directory, rewritten
//! atomically — but keyed by arbitrary variable name rather than by OAuth
//! profile, and guarded by an mkdir-based lock rather than an advisory file
//! lock: `mkdir` is atomic on every platform this gateway targets, so it
//! needs no extra crate where the teacher reached for `fs2`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

const LOCK_RETRY_INITIAL: Duration = Duration::from_millis(10);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(250);
const LOCK_RETRY_BUDGET: Duration = Duration::from_secs(5);
const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

/// A single credential file, addressed by path so tests don't touch the
/// real home directory.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.grimoire/credentials.env`, the default location env expansion
    /// consults.
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("unable to determine home directory for credential store".into()))?;
        Ok(Self::at(home.join(".grimoire").join("credentials.env")))
    }

    /// Reads `key`'s value, or `None` if the file or the key is absent.
    /// Unlocked: the writer's atomic rename means a concurrent read either
    /// sees the file before or after a write, never a torn one.
    pub fn get(&self, key: &str) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        parse(&contents).remove(key)
    }

    /// Sets `key` to `value`, merging with whatever is already on disk.
    /// Serializes against concurrent writers (including other processes)
    /// via an mkdir-based lock, then rewrites the whole file through a
    /// temp-file-rename so readers never observe a partial write.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _guard = LockGuard::acquire(&self.path)?;

        let mut entries = match std::fs::read_to_string(&self.path) {
            Ok(contents) => parse(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        entries.insert(key.to_string(), value.to_string());

        let rendered = render(&entries);
        let tmp_path = self.path.with_extension("env.tmp");
        std::fs::write(&tmp_path, rendered)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Looks `name` up in the default credential store, swallowing any I/O or
/// home-directory-resolution error as "not found" — env expansion has
/// already decided a missing value just expands to empty.
pub(crate) fn lookup_default(name: &str) -> Option<String> {
    match CredentialStore::open_default() {
        Ok(store) => store.get(name),
        Err(err) => {
            tracing::warn!(error = %err, "could not resolve credential store path");
            None
        }
    }
}

fn parse(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            line.split_once('=').map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn render(entries: &BTreeMap<String, String>) -> String {
    entries.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
}

/// An mkdir-based advisory lock on `<path>.lock`. Held for the duration of
/// a `set` call; released on drop.
struct LockGuard {
    lock_dir: PathBuf,
}

impl LockGuard {
    fn acquire(target: &Path) -> Result<Self> {
        let lock_dir = target.with_extension("env.lock");
        let mut backoff = LOCK_RETRY_INITIAL;
        let start = std::time::Instant::now();

        loop {
            match std::fs::create_dir(&lock_dir) {
                Ok(()) => return Ok(Self { lock_dir }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_dir) {
                        // Best-effort: if another process wins the race to
                        // break the lock first, our next create_dir retry
                        // simply fails again and we keep backing off.
                        let _ = std::fs::remove_dir(&lock_dir);
                        continue;
                    }
                    if start.elapsed() > LOCK_RETRY_BUDGET {
                        return Err(Error::Config(format!(
                            "timed out waiting for credential store lock at {}",
                            lock_dir.display()
                        )));
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(LOCK_RETRY_MAX);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(&self.lock_dir);
    }
}

fn is_stale(lock_dir: &Path) -> bool {
    std::fs::metadata(lock_dir)
        .and_then(|meta| meta.modified())
        .map(|modified| modified.elapsed().unwrap_or(Duration::ZERO) > STALE_LOCK_AGE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("credentials.env"));
        store.set("API_KEY", "sk-123").unwrap();
        assert_eq!(store.get("API_KEY"), Some("sk-123".to_string()));
    }

    #[test]
    fn get_on_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("credentials.env"));
        assert_eq!(store.get("ANYTHING"), None);
    }

    #[test]
    fn set_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("credentials.env"));
        store.set("A", "1").unwrap();
        store.set("B", "2").unwrap();
        assert_eq!(store.get("A"), Some("1".to_string()));
        assert_eq!(store.get("B"), Some("2".to_string()));
    }

    #[test]
    fn set_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("credentials.env"));
        store.set("A", "1").unwrap();
        store.set("A", "2").unwrap();
        assert_eq!(store.get("A"), Some("2".to_string()));
    }

    #[test]
    fn stale_lock_is_broken_instead_of_blocking_forever() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.env");
        let lock_dir = path.with_extension("env.lock");
        std::fs::create_dir_all(&lock_dir).unwrap();

        // Backdate the lock dir's mtime past the staleness threshold
        // instead of sleeping in the test.
        let stale_time = std::time::SystemTime::now() - Duration::from_secs(STALE_LOCK_AGE.as_secs() + 5);
        let file = std::fs::File::open(&lock_dir).unwrap();
        file.set_modified(stale_time).unwrap();

        let store = CredentialStore::at(path);
        store.set("KEY", "value").unwrap();
        assert_eq!(store.get("KEY"), Some("value".to_string()));
    }

    /// **P7**: concurrent `set` calls from multiple "instances" (threads
    /// standing in for processes, since the lock is filesystem-global)
    /// never lose a write; every distinct key survives exactly once.
    #[test]
    fn concurrent_sets_never_lose_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("credentials.env"));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    let store = CredentialStore::at(path.as_path());
                    store.set(&format!("KEY_{i}"), &format!("value_{i}")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = CredentialStore::at(path.as_path());
        for i in 0..16 {
            assert_eq!(store.get(&format!("KEY_{i}")), Some(format!("value_{i}")));
        }
    }
}
