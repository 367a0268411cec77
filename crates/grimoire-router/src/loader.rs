//! Scans a spells directory for `*.spell.yaml` files and parses them
//! into [`SpellConfig`]s, skipping and warning on anything invalid.

use std::path::Path;

use grimoire_domain::error::Result;
use grimoire_domain::spell::SpellConfig;

const SPELL_SUFFIX: &str = ".spell.yaml";

/// Parses a single spell file.
pub fn load_spell_file(path: &Path) -> Result<SpellConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: SpellConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Scans `spells_root` for `*.spell.yaml` files and parses each one.
///
/// Missing directory is not an error — it just yields no spells, since a
/// fresh install has nothing configured yet. A spell file whose name
/// collides with one already loaded keeps the first one seen (sorted by
/// filename), logging a warning about the duplicate.
pub fn scan_spells(spells_root: &Path) -> Result<Vec<SpellConfig>> {
    let mut loaded = Vec::new();
    if !spells_root.exists() {
        return Ok(loaded);
    }

    let mut paths: Vec<_> = std::fs::read_dir(spells_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path_has_spell_suffix(path))
        .collect();
    paths.sort();

    let mut seen_names = std::collections::HashSet::new();
    for path in paths {
        match load_spell_file(&path) {
            Ok(config) => {
                if !seen_names.insert(config.name.clone()) {
                    tracing::warn!(
                        name = config.name,
                        path = %path.display(),
                        "skipping spell with a name already loaded from another file"
                    );
                    continue;
                }
                loaded.push(config);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping invalid spell file");
            }
        }
    }

    Ok(loaded)
}

pub(crate) fn path_has_spell_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(SPELL_SUFFIX))
        .unwrap_or(false)
}
