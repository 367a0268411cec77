//! Filesystem watcher for the spell directory: coalesces editor-save
//! bursts with a stability window, then debounces per-file so a flurry
//! of writes to one file produces a single reindex event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;

use grimoire_domain::config::WatcherConfig;
use grimoire_domain::error::{Error, Result};
use grimoire_domain::spell::SpellConfig;

use crate::loader::{load_spell_file, path_has_spell_suffix};

/// A coalesced, already-parsed change to the spell directory.
pub enum SpellEvent {
    Added(SpellConfig),
    /// Carries the new config; the caller is responsible for killing any
    /// currently active instance of the old one before reindexing.
    Changed(SpellConfig),
    Removed(String),
}

/// Owns the underlying OS file watcher. Dropping this stops watching;
/// the debounce thread exits once its channel disconnects.
pub struct SpellWatcher {
    _inner: RecommendedWatcher,
}

impl SpellWatcher {
    /// Starts watching `spells_root` and returns the watcher handle plus
    /// a channel of coalesced [`SpellEvent`]s. The directory need not
    /// exist yet; the watcher simply stays idle until it is created.
    pub fn start(spells_root: PathBuf, config: WatcherConfig) -> Result<(Self, mpsc::UnboundedReceiver<SpellEvent>)> {
        let (raw_tx, raw_rx) = std_mpsc::channel();
        let mut inner: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    let _ = raw_tx.send(event);
                }
            })
            .map_err(|err| Error::Other(format!("failed to start spell directory watcher: {err}")))?;

        if spells_root.exists() {
            inner
                .watch(&spells_root, RecursiveMode::NonRecursive)
                .map_err(|err| Error::Other(format!("failed to watch {}: {err}", spells_root.display())))?;
        } else {
            tracing::warn!(
                path = %spells_root.display(),
                "spells directory does not exist yet, watcher is idle until it is created"
            );
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || run_debounce_loop(&spells_root, &config, &raw_rx, &event_tx));

        Ok((Self { _inner: inner }, event_rx))
    }
}

fn run_debounce_loop(
    spells_root: &Path,
    config: &WatcherConfig,
    raw_rx: &std_mpsc::Receiver<notify::Event>,
    event_tx: &mpsc::UnboundedSender<SpellEvent>,
) {
    let stability_window = Duration::from_millis(config.stability_window_ms);
    let per_file_debounce = Duration::from_millis(config.per_file_debounce_ms);
    let mut dirty: HashMap<PathBuf, Instant> = HashMap::new();
    let mut known = index_known(spells_root);

    loop {
        match raw_rx.recv_timeout(stability_window) {
            Ok(event) => {
                for path in event.paths {
                    if path_has_spell_suffix(&path) {
                        dirty.insert(path, Instant::now());
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                let ready: Vec<PathBuf> = dirty
                    .iter()
                    .filter(|(_, seen)| seen.elapsed() >= per_file_debounce)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in ready {
                    dirty.remove(&path);
                    process_path(&path, &mut known, event_tx);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn index_known(spells_root: &Path) -> HashMap<PathBuf, SpellConfig> {
    let mut map = HashMap::new();
    let Ok(entries) = std::fs::read_dir(spells_root) else {
        return map;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.is_file() && path_has_spell_suffix(&path) {
            if let Ok(config) = load_spell_file(&path) {
                map.insert(path, config);
            }
        }
    }
    map
}

/// Applies a single file's (re)appearance or disappearance: emits
/// `Added`/`Changed`/`Removed`, or nothing if the content hash is
/// unchanged (a save with no semantic effect, e.g. reformatting).
fn process_path(path: &Path, known: &mut HashMap<PathBuf, SpellConfig>, event_tx: &mpsc::UnboundedSender<SpellEvent>) {
    if !path.exists() {
        if let Some(previous) = known.remove(path) {
            tracing::info!(spell = previous.name, path = %path.display(), "spell file removed");
            let _ = event_tx.send(SpellEvent::Removed(previous.name));
        }
        return;
    }

    match load_spell_file(path) {
        Ok(config) => {
            let event = match known.insert(path.to_path_buf(), config.clone()) {
                Some(previous) if previous.content_hash() == config.content_hash() => None,
                Some(_) => Some(SpellEvent::Changed(config)),
                None => Some(SpellEvent::Added(config)),
            };
            if let Some(event) = event {
                let _ = event_tx.send(event);
            }
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring invalid spell file change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDIO_SPELL: &str = r#"
name: weather
version: "1.0.0"
description: "Fetches weather forecasts"
keywords: ["weather", "forecast"]
server:
  type: stdio
  command: "weather-mcp"
  args: []
"#;

    const STDIO_SPELL_CHANGED: &str = r#"
name: weather
version: "1.0.0"
description: "Fetches weather forecasts and alerts"
keywords: ["weather", "forecast", "alerts"]
server:
  type: stdio
  command: "weather-mcp"
  args: []
"#;

    #[test]
    fn add_then_remove_round_trips_through_known_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.spell.yaml");
        let mut known = HashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::fs::write(&path, STDIO_SPELL).unwrap();
        process_path(&path, &mut known, &tx);
        assert!(matches!(rx.try_recv(), Ok(SpellEvent::Added(cfg)) if cfg.name == "weather"));

        std::fs::remove_file(&path).unwrap();
        process_path(&path, &mut known, &tx);
        assert!(matches!(rx.try_recv(), Ok(SpellEvent::Removed(name)) if name == "weather"));
        assert!(known.is_empty());
    }

    #[test]
    fn unchanged_content_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.spell.yaml");
        let mut known = HashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::fs::write(&path, STDIO_SPELL).unwrap();
        process_path(&path, &mut known, &tx);
        rx.try_recv().unwrap();

        // Re-save with identical content (e.g. the editor touching mtime only).
        std::fs::write(&path, STDIO_SPELL).unwrap();
        process_path(&path, &mut known, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn changed_content_emits_changed_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.spell.yaml");
        let mut known = HashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::fs::write(&path, STDIO_SPELL).unwrap();
        process_path(&path, &mut known, &tx);
        rx.try_recv().unwrap();

        std::fs::write(&path, STDIO_SPELL_CHANGED).unwrap();
        process_path(&path, &mut known, &tx);
        assert!(matches!(rx.try_recv(), Ok(SpellEvent::Changed(cfg)) if cfg.keywords.len() == 3));
    }
}
