use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "d_stability_window_ms")]
    pub stability_window_ms: u64,
    #[serde(default = "d_per_file_debounce_ms")]
    pub per_file_debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_window_ms: d_stability_window_ms(),
            per_file_debounce_ms: d_per_file_debounce_ms(),
        }
    }
}

fn d_stability_window_ms() -> u64 {
    300
}

fn d_per_file_debounce_ms() -> u64 {
    500
}
