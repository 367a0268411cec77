mod debounce;
mod reaper;
mod store;
mod watcher;

pub use debounce::DebounceConfig;
pub use reaper::ReaperConfig;
pub use store::StoreConfig;
pub use watcher::WatcherConfig;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration, composed of one sub-config per
/// concern. Every field defaults so that an empty or partial YAML
/// document still produces a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            reaper: ReaperConfig::default(),
            watcher: WatcherConfig::default(),
            debounce: DebounceConfig::default(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
