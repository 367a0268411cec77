//! Composes C1-C6 into a running gateway: `build_app_state` wires the
//! store, resolver, lifecycle manager, router, and watcher together and
//! performs the initial spell scan; `spawn_background_tasks` starts the
//! reaper ticker and the watcher-event consumption loop, one
//! `tokio::spawn` per concern, matching the teacher's
//! `spawn_background_tasks` style.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;

use grimoire_domain::config::GatewayConfig;
use grimoire_embed::EmbeddingService;
use grimoire_mcp::ProcessLifecycleManager;
use grimoire_resolver::HybridResolver;
use grimoire_router::{scan_spells, SpellEvent, SpellWatcher, ToolRouter};
use grimoire_store::EmbeddingStore;

/// Every long-lived component the façade and background tasks need.
pub struct AppState {
    pub store: Arc<EmbeddingStore>,
    pub embedder: Arc<EmbeddingService>,
    pub resolver: Arc<HybridResolver>,
    pub lifecycle: Arc<ProcessLifecycleManager>,
    pub router: Arc<ToolRouter>,
    pub reaper_threshold: u64,
    pub reaper_interval: Duration,
    /// Fires whenever the watcher kills and unregisters an active
    /// spell's tools, so the upstream server loop can emit
    /// `notifications/tools/list_changed` without the caller having to
    /// poll `tools/list`.
    pub tools_changed: broadcast::Sender<()>,
    // Keeps the underlying OS watcher (and its debounce thread) alive for
    // the lifetime of the gateway; never read directly.
    _watcher: SpellWatcher,
}

/// Builds the full app state and performs the initial directory scan,
/// indexing every spell found. Returns the state plus the channel of
/// hot-reload events for `spawn_background_tasks` to consume.
pub async fn build_app_state(config: &GatewayConfig) -> anyhow::Result<(Arc<AppState>, UnboundedReceiver<SpellEvent>)> {
    let store = Arc::new(EmbeddingStore::load(
        &config.store.state_path,
        &config.embedding_model,
        grimoire_embed::DIMENSION,
    ));

    let embedder = grimoire_embed::instance().await?;
    let resolver = Arc::new(HybridResolver::new(store.clone()));

    let lifecycle = ProcessLifecycleManager::new(store.clone(), Duration::from_secs(config.debounce.persist_secs));
    lifecycle.load_from_storage();

    let router = Arc::new(ToolRouter::new());

    let initial = scan_spells(&config.store.spells_path)?;
    tracing::info!(count = initial.len(), "indexing spells found at startup");
    for spell in &initial {
        if let Err(err) = resolver.index(spell, &embedder) {
            tracing::warn!(spell = spell.name, error = %err, "failed to index spell at startup");
        }
    }

    let (watcher, events) = SpellWatcher::start(config.store.spells_path.clone(), config.watcher.clone())?;
    let (tools_changed, _) = broadcast::channel(16);

    let state = Arc::new(AppState {
        store,
        embedder,
        resolver,
        lifecycle,
        router,
        reaper_threshold: config.reaper.threshold_turns,
        reaper_interval: Duration::from_secs(config.reaper.interval_secs),
        tools_changed,
        _watcher: watcher,
    });

    Ok((state, events))
}

/// Spawns the reaper ticker and the watcher-event consumption loop.
pub fn spawn_background_tasks(state: Arc<AppState>, mut events: UnboundedReceiver<SpellEvent>) {
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.reaper_interval);
            loop {
                interval.tick().await;
                let killed = state.lifecycle.cleanup_inactive(state.reaper_threshold).await;
                if !killed.is_empty() {
                    tracing::info!(spells = ?killed, "reaper killed inactive spells");
                }
            }
        });
    }

    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                apply_spell_event(&state, event).await;
            }
            tracing::warn!("spell watcher event channel closed, hot-reload is no longer active");
        });
    }
}

/// Applies a single hot-reload event per §4.6: an active spell whose
/// file changed or disappeared is killed and unregistered before the
/// resolver's index is updated; it is not pre-emptively respawned.
async fn apply_spell_event(state: &AppState, event: SpellEvent) {
    match event {
        SpellEvent::Added(config) => {
            tracing::info!(spell = config.name, "spell file added, indexing");
            if let Err(err) = state.resolver.index(&config, &state.embedder) {
                tracing::warn!(spell = config.name, error = %err, "failed to index newly added spell");
            }
        }
        SpellEvent::Changed(config) => {
            tracing::info!(spell = config.name, "spell file changed, reindexing");
            if state.lifecycle.is_active(&config.name) {
                state.lifecycle.kill(&config.name).await;
                state.router.unregister_tools(&config.name);
                let _ = state.tools_changed.send(());
            }
            if let Err(err) = state.resolver.remove(&config.name) {
                tracing::warn!(spell = config.name, error = %err, "failed to remove stale index entry");
            }
            if let Err(err) = state.resolver.index(&config, &state.embedder) {
                tracing::warn!(spell = config.name, error = %err, "failed to reindex changed spell");
            }
        }
        SpellEvent::Removed(name) => {
            tracing::info!(spell = name, "spell file removed");
            if state.lifecycle.is_active(&name) {
                state.lifecycle.kill(&name).await;
                state.router.unregister_tools(&name);
                let _ = state.tools_changed.send(());
            }
            if let Err(err) = state.resolver.remove(&name) {
                tracing::warn!(spell = name, error = %err, "failed to remove stale index entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let mut config = GatewayConfig::default();
        config.store.spells_path = dir.path().join("spells");
        config.store.state_path = dir.path().join("store.msgpack");
        std::fs::create_dir_all(&config.store.spells_path).unwrap();
        let (state, _events) = build_app_state(&config).await.unwrap();
        state
    }

    #[tokio::test]
    #[ignore = "loads a real embedding model via build_app_state; run explicitly with --ignored"]
    async fn removed_event_on_inactive_spell_does_not_fire_tools_changed() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let mut subscriber = state.tools_changed.subscribe();

        apply_spell_event(&state, SpellEvent::Removed("never-active".into())).await;

        assert!(subscriber.try_recv().is_err());
    }

    #[tokio::test]
    #[ignore = "loads a real embedding model via build_app_state; run explicitly with --ignored"]
    async fn build_app_state_starts_with_no_active_spells() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        assert!(state.lifecycle.active_spell_names().is_empty());
        assert!(state.resolver.indexed_names().is_empty());
    }
}
