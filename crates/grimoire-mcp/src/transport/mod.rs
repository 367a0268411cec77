//! Downstream transport implementations: stdio (spawned child process),
//! SSE (persistent streaming connection), and streamable HTTP.

mod http;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::JsonRpcResponse;

/// Trait implemented by every downstream spell transport.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Sends a JSON-RPC request and waits for the matching response.
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, TransportError>;

    /// Sends a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// True if the transport is still usable.
    fn is_alive(&self) -> bool;

    /// Shuts the transport down; always completes, even on error.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("transport not supported: {0}")]
    Unsupported(String),
}
