//! Loads [`GatewayConfig`] from `GRIMOIRE_CONFIG` (or a platform default),
//! falling back to built-in defaults when the file is absent, exactly as
//! the teacher's `load_config` treats a missing `config.toml`.

use std::path::{Path, PathBuf};

use grimoire_domain::config::GatewayConfig;

const DEFAULT_CONFIG_PATH: &str = "~/.grimoire/config.yaml";

/// Loads the configuration from the path named by `GRIMOIRE_CONFIG`, or
/// `~/.grimoire/config.yaml` if unset. A missing file is not an error —
/// it just means "use the defaults". `GRIMOIRE_SPELLS_DIR` and
/// `GRIMOIRE_STATE_PATH`, if set, override the corresponding store paths
/// after the file is parsed.
pub fn load_config() -> anyhow::Result<(GatewayConfig, String)> {
    let config_path = std::env::var("GRIMOIRE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let resolved_path = expand_home(Path::new(&config_path));

    let mut config = if resolved_path.exists() {
        let raw = std::fs::read_to_string(&resolved_path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", resolved_path.display()))?;
        serde_yaml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", resolved_path.display()))?
    } else {
        GatewayConfig::default()
    };

    if let Ok(dir) = std::env::var("GRIMOIRE_SPELLS_DIR") {
        config.store.spells_path = PathBuf::from(dir);
    }
    if let Ok(path) = std::env::var("GRIMOIRE_STATE_PATH") {
        config.store.state_path = PathBuf::from(path);
    }

    config.store.spells_path = expand_home(&config.store.spells_path);
    config.store.state_path = expand_home(&config.store.state_path);

    Ok((config, config_path))
}

/// Expands a leading `~` (or `~/...`) to the user's home directory.
/// Paths without a leading `~` are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix('~')) else {
        return path.to_path_buf();
    };
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
