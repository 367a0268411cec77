use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Maximum number of non-JSON lines to skip before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Stdio transport: communicates with a spawned child process over
/// stdin/stdout, one JSON-RPC message per newline-delimited line.
///
/// `request_lock` serializes entire request/response cycles so concurrent
/// callers never read each other's responses.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawns `command args...` with `env` merged into the child's
    /// environment, piping stdin/stdout/stderr.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    /// The OS process ID of the spawned child, if still known.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Reads a line of JSON from stdout, skipping empty or non-JSON
    /// lines (e.g. stderr leaking onto stdout). Gives up after
    /// [`MAX_SKIP_LINES`] to avoid spinning on a misbehaving server.
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "spell server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from spell stdout");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, TransportError> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(id, method, "sending request to spell");
        self.write_line(&json).await?;

        let timeout = tokio::time::Duration::from_secs(30);
        let result = tokio::time::timeout(timeout, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::debug!(expected_id = id, got_id = resp.id, "response for a different request, continuing");
                }
                tracing::debug!(line = %line, "skipping non-matching message from spell");
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(method, "sending notification to spell");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(err) = stdin.shutdown().await {
                tracing::debug!(error = %err, "error closing spell stdin");
            }
        }
        let wait = tokio::time::timeout(tokio::time::Duration::from_secs(5), child.wait()).await;
        match wait {
            Ok(Ok(status)) => tracing::debug!(?status, "spell process exited"),
            Ok(Err(err)) => tracing::warn!(error = %err, "error waiting for spell process"),
            Err(_) => {
                tracing::warn!("spell process did not exit within timeout, killing");
                if let Err(err) = child.kill().await {
                    tracing::warn!(error = %err, "failed to kill spell process");
                }
            }
        }
    }
}
