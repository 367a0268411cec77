//! The tool router and spell-directory hot-reload watcher (C6): which
//! active spell serves which tool, and keeping both in sync with the
//! spell files on disk.

pub mod loader;
pub mod router;
pub mod watcher;

pub use loader::{load_spell_file, scan_spells};
pub use router::ToolRouter;
pub use watcher::{SpellEvent, SpellWatcher};
