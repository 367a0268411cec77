//! Shared types for the grimoire gateway: the spell schema, the tool
//! descriptor, the error taxonomy, and typed configuration.

pub mod config;
pub mod credential_store;
pub mod env;
pub mod error;
pub mod spell;
pub mod tool;

pub use error::{Error, Result};
pub use spell::{AuthConfig, ServerConfig, SpellConfig};
pub use tool::ToolDescriptor;
