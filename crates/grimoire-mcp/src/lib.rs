//! Everything needed to speak MCP to a downstream spell server and keep
//! its process alive across turns: wire types, transports, OAuth token
//! providers, activation, and the turn-based lifecycle manager.

pub mod lifecycle;
pub mod manager;
pub mod oauth;
pub mod protocol;
pub mod transport;

pub use lifecycle::ProcessLifecycleManager;
pub use manager::{activate, ActiveSpell};
pub use transport::{HttpTransport, McpTransport, SseTransport, StdioTransport, TransportError};
