//! Minimal CLI surface (§10.8): `grimoire serve` is effectively the only
//! command. Spell-authoring commands (`create`/`list`/`validate`/
//! `example`) are out of scope per §1 and are not implemented here.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "grimoire", version, about = "A meta-gateway for model-context tool servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
}
