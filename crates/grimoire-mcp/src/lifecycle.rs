//! The process lifecycle manager (C5): spawns/connects spells on demand,
//! tracks per-spell last-used turn, reaps inactivity, and persists its
//! own bookkeeping through a debounced, fire-and-forget flusher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use grimoire_domain::error::{Error, Result};
use grimoire_domain::spell::SpellConfig;
use grimoire_domain::tool::ToolDescriptor;
use grimoire_store::{EmbeddingStore, UsageEntry};

use crate::manager::{self, ActiveSpell};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Owns every currently-active spell connection and the turn-based usage
/// bookkeeping that decides which spells are reaped for inactivity.
pub struct ProcessLifecycleManager {
    active: RwLock<HashMap<String, ActiveSpell>>,
    usage_tracking: RwLock<HashMap<String, u64>>,
    current_turn: AtomicU64,
    store: Arc<EmbeddingStore>,
    persist_notify: Arc<Notify>,
    connect_timeout: Duration,
    /// One async mutex per spell name, held across the whole
    /// check-then-activate-then-insert sequence in `spawn`. This is the
    /// `Inactive -> Spawning -> Active` transition's mutual exclusion:
    /// without it, two concurrent `spawn` calls for the same name would
    /// both pass the initial `active` check and both call
    /// `manager::activate`.
    spawn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessLifecycleManager {
    /// Builds a manager and spawns its background debounced-persistence
    /// flusher. `debounce` is the coalescing window from
    /// [`grimoire_domain::config::DebounceConfig`].
    pub fn new(store: Arc<EmbeddingStore>, debounce: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            active: RwLock::new(HashMap::new()),
            usage_tracking: RwLock::new(HashMap::new()),
            current_turn: AtomicU64::new(0),
            store,
            persist_notify: Arc::new(Notify::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            spawn_locks: Mutex::new(HashMap::new()),
        });
        manager.clone().spawn_persist_task(debounce);
        manager
    }

    fn spawn_persist_task(self: Arc<Self>, debounce: Duration) {
        tokio::spawn(async move {
            loop {
                self.persist_notify.notified().await;
                tokio::time::sleep(debounce).await;
                self.flush_to_storage();
            }
        });
    }

    fn flush_to_storage(&self) {
        let usage_tracking: HashMap<String, UsageEntry> = self
            .usage_tracking
            .read()
            .iter()
            .map(|(name, turn)| (name.clone(), UsageEntry { last_used_turn: *turn }))
            .collect();
        let active_pids: HashMap<String, u32> = self
            .active
            .read()
            .iter()
            .filter_map(|(name, spell)| spell.pid.map(|pid| (name.clone(), pid)))
            .collect();
        let current_turn = self.current_turn.load(Ordering::SeqCst);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        self.store.update_lifecycle_metadata(|metadata| {
            metadata.current_turn = current_turn;
            metadata.usage_tracking = usage_tracking;
            metadata.active_pids = active_pids;
            metadata.last_saved = now;
        });

        if let Err(err) = self.store.save() {
            tracing::warn!(error = %err, "failed to persist lifecycle metadata, will retry on next dirty signal");
        }
    }

    fn request_save(&self) {
        self.persist_notify.notify_one();
    }

    /// Spawns or connects `config`'s server if not already active, and
    /// returns its tool list either way. Two concurrent calls for the
    /// same name never race: the second blocks on the per-name spawn
    /// lock until the first finishes, then returns the shared result
    /// instead of spawning a second time.
    pub async fn spawn(&self, config: &SpellConfig) -> Result<Vec<ToolDescriptor>> {
        if let Some(existing) = self.active.read().get(&config.name) {
            return Ok(existing.tools.clone());
        }

        let lock = self.spawn_lock_for(&config.name);
        let _guard = lock.lock().await;

        // Re-check under the per-name lock: another caller may have
        // finished spawning this spell while we were waiting for it.
        if let Some(existing) = self.active.read().get(&config.name) {
            return Ok(existing.tools.clone());
        }

        let active = manager::activate(config, self.connect_timeout).await?;
        let tools = active.tools.clone();
        let current_turn = self.current_turn.load(Ordering::SeqCst);

        self.active.write().insert(config.name.clone(), active);
        self.usage_tracking.write().insert(config.name.clone(), current_turn);
        self.request_save();

        Ok(tools)
    }

    fn spawn_lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.spawn_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.read().contains_key(name)
    }

    pub fn get_active_tools(&self, name: &str) -> Option<Vec<ToolDescriptor>> {
        self.active.read().get(name).map(|spell| spell.tools.clone())
    }

    pub fn active_spell_names(&self) -> Vec<String> {
        self.active.read().keys().cloned().collect()
    }

    /// Passes a `tools/call` through to `spell_name`'s transport. The
    /// spell must already be active; callers look it up via the router
    /// and are expected to have activated it first.
    pub async fn call_tool(
        &self,
        spell_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let transport = {
            let active = self.active.read();
            let spell = active
                .get(spell_name)
                .ok_or_else(|| Error::SpellNotFound(spell_name.to_string()))?;
            spell.transport.clone()
        };

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let response = transport
            .send_request("tools/call", Some(params))
            .await
            .map_err(|err| Error::Other(err.to_string()))?;
        response.into_result().map_err(|err| Error::Other(err.to_string()))
    }

    /// Kills a single active spell. Best-effort: failures are logged and
    /// the spell is removed from `active` regardless.
    pub async fn kill(&self, name: &str) {
        let spell = self.active.write().remove(name);
        if let Some(spell) = spell {
            spell.transport.shutdown().await;
        }
        self.usage_tracking.write().remove(name);
        self.request_save();
    }

    /// Kills every active spell concurrently. Never fails; individual
    /// kill errors are impossible by construction since `kill` itself
    /// never returns an error.
    pub async fn kill_all(&self) {
        let names: Vec<String> = self.active.read().keys().cloned().collect();
        futures_util::future::join_all(names.iter().map(|name| self.kill(name))).await;
    }

    pub fn increment_turn(&self) -> u64 {
        let turn = self.current_turn.fetch_add(1, Ordering::SeqCst) + 1;
        self.request_save();
        turn
    }

    pub fn current_turn(&self) -> u64 {
        self.current_turn.load(Ordering::SeqCst)
    }

    /// Marks `name` as used on the current turn. A no-op (logged, not
    /// raised) if `name` is not currently active.
    pub fn mark_used(&self, name: &str) {
        let turn = self.current_turn.load(Ordering::SeqCst);
        let mut usage = self.usage_tracking.write();
        if !self.active.read().contains_key(name) {
            tracing::debug!(spell = name, "mark_used called for an inactive spell, ignoring");
            return;
        }
        usage.insert(name.to_string(), turn);
        drop(usage);
        self.request_save();
    }

    /// Spells whose last-used turn is `threshold` or more turns behind
    /// the current turn. A spell with no usage entry is never considered
    /// inactive by this check, even if long active.
    pub fn get_inactive_spells(&self, threshold: u64) -> Vec<String> {
        let current_turn = self.current_turn.load(Ordering::SeqCst);
        let active = self.active.read();
        self.usage_tracking
            .read()
            .iter()
            .filter(|(name, last_used)| {
                active.contains_key(name.as_str()) && current_turn.saturating_sub(**last_used) >= threshold
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Kills every spell inactive for at least `threshold` turns and
    /// returns the names killed, in deterministic (sorted) order.
    pub async fn cleanup_inactive(&self, threshold: u64) -> Vec<String> {
        let mut names = self.get_inactive_spells(threshold);
        names.sort();
        for name in &names {
            self.kill(name).await;
        }
        names
    }

    /// Restores turn/usage bookkeeping from the store and kills any
    /// orphaned process left over from a previous run. Never resurrects
    /// connections; spells begin inactive and are spawned lazily.
    pub fn load_from_storage(&self) {
        let metadata = match self.store.get_lifecycle_metadata() {
            Some(metadata) => metadata,
            None => return,
        };
        self.current_turn.store(metadata.current_turn, Ordering::SeqCst);
        *self.usage_tracking.write() = metadata
            .usage_tracking
            .into_iter()
            .map(|(name, entry)| (name, entry.last_used_turn))
            .collect();

        let mut killed = 0usize;
        let mut found = 0usize;
        for (name, pid) in metadata.active_pids {
            found += 1;
            if process_is_alive(pid) {
                tracing::warn!(spell = %name, pid, "found orphaned spell process from a previous run, killing");
                terminate_process(pid);
                killed += 1;
            }
        }
        if found > 0 {
            tracing::info!(found, killed, "crash recovery: orphan scan complete");
        }
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate_process(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();
}

#[cfg(not(unix))]
fn terminate_process(_pid: u32) {}
