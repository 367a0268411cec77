use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "d_spells_path")]
    pub spells_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            spells_path: d_spells_path(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("~/.grimoire/embeddings.msgpack")
}

fn d_spells_path() -> PathBuf {
    PathBuf::from("~/.grimoire/spells")
}
