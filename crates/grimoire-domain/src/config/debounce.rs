use serde::{Deserialize, Serialize};

/// Debounce window for the lifecycle manager's persistence flusher
/// (§4.5.4): writes to the embedding store's lifecycle block are
/// coalesced rather than performed on every `incrementTurn`/`markUsed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "d_persist_secs")]
    pub persist_secs: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            persist_secs: d_persist_secs(),
        }
    }
}

fn d_persist_secs() -> u64 {
    5
}
