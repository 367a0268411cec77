use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "d_threshold_turns")]
    pub threshold_turns: u64,
    #[serde(default = "d_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            threshold_turns: d_threshold_turns(),
            interval_secs: d_interval_secs(),
        }
    }
}

fn d_threshold_turns() -> u64 {
    5
}

fn d_interval_secs() -> u64 {
    30
}
