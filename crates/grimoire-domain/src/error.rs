use std::io;

/// Shared error type for every grimoire crate.
///
/// Background activities (the reaper, the watcher, the debounced
/// persistence flusher) never propagate these; they log and continue.
/// Only `SpellNotFound` and `ActivationError` reach the gateway façade as
/// raised errors — everything else is translated into a structured
/// response shape.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("msgpack encode error: {0}")]
    MsgPackEncode(String),

    #[error("msgpack decode error: {0}")]
    MsgPackDecode(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("query must be a non-empty string")]
    EmptyQuery,

    #[error("spell not found: {0}")]
    SpellNotFound(String),

    #[error("failed to activate spell '{name}': {message} ({fix})")]
    ActivationError {
        name: String,
        message: String,
        fix: String,
    },

    #[error("resolution failed: {0}")]
    ResolutionError(String),

    #[error("persistence failed: {0}")]
    PersistenceError(String),

    #[error("store is corrupt, degrading to empty: {0}")]
    CorruptState(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Derives an actionable fix hint from a raw downstream error message,
    /// per the activation-error mapping table.
    pub fn activation_fix(is_stdio: bool, raw: &str) -> String {
        let lower = raw.to_lowercase();
        if lower.contains("enoent") || lower.contains("no such file") {
            return "command not found; install it or correct the command".into();
        }
        if lower.contains("eacces") || lower.contains("permission denied") {
            return "permission denied; check the executable bit".into();
        }
        if lower.contains("econnrefused") || lower.contains("connection refused") {
            return "server not reachable at the configured url".into();
        }
        if lower.contains("eaddrinuse") || lower.contains("address already in use") {
            return "port already in use".into();
        }
        if lower.contains("cannot find module") {
            return "missing dependencies; install them and retry".into();
        }
        if lower.contains("timeout") || lower.contains("etimedout") {
            return "connection timed out".into();
        }
        if is_stdio {
            "verify the command and its arguments".into()
        } else {
            "verify the url and that the remote server is running".into()
        }
    }
}
