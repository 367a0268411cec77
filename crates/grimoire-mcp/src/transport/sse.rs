use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Extracts complete `data:` payloads from an SSE buffer, draining
/// consumed bytes in place and leaving any trailing partial event for
/// the next call. SSE events are delimited by a blank line (`\n\n`).
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);
        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }
    data_lines
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// SSE transport: opens a single long-lived `GET` stream to receive
/// responses and server-initiated notifications, and issues each
/// outbound request as a `POST` to the same URL, correlating the two by
/// JSON-RPC `id`.
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(url: &str, headers: &HashMap<String, String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::new();
        let header_map = build_header_map(headers)?;

        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .headers(header_map.clone())
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "SSE connect to {url} failed with status {}",
                response.status()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(response, pending.clone(), alive.clone()));

        Ok(Self {
            client,
            url: url.to_string(),
            headers: header_map,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader_task,
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn read_loop(mut response: reqwest::Response, pending: PendingMap, alive: Arc<AtomicBool>) {
    let mut buffer = String::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                for data in drain_data_lines(&mut buffer) {
                    dispatch_event(&data, &pending);
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "SSE stream read error, marking transport dead");
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
}

fn dispatch_event(data: &str, pending: &PendingMap) {
    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(resp) => {
            if let Some(sender) = pending.lock().remove(&resp.id) {
                let _ = sender.send(resp);
            } else {
                tracing::debug!(id = resp.id, "received SSE response with no matching pending request");
            }
        }
        Err(_) => {
            tracing::debug!(data, "skipping non-response SSE event (likely a notification)");
        }
    }
}

fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|err| TransportError::Http(err.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let post = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&req)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if !post.status().is_success() {
            self.pending.lock().remove(&id);
            return Err(TransportError::Http(format!(
                "POST to {} failed with status {}",
                self.url,
                post.status()
            )));
        }

        // Some servers answer synchronously in the POST body instead of
        // over the SSE channel.
        if let Ok(body) = post.json::<JsonRpcResponse>().await {
            if body.id == id {
                self.pending.lock().remove(&id);
                return Ok(body);
            }
        }

        match tokio::time::timeout(tokio::time::Duration::from_secs(30), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::Http("SSE response channel closed".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let post = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&notif)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;
        if !post.status().is_success() {
            return Err(TransportError::Http(format!(
                "notification POST to {} failed with status {}",
                self.url,
                post.status()
            )));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        for (_, sender) in self.pending.lock().drain() {
            drop(sender);
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        let lines = drain_data_lines(&mut buf);
        assert!(lines.is_empty());
        buf.push_str("\n\ndata: chunk2\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "chunk2"]);
    }

    #[test]
    fn dispatch_event_resolves_matching_pending_request() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert(7, tx);

        dispatch_event(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#, &pending);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.id, 7);
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn dispatch_event_ignores_unmatched_id() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        dispatch_event(r#"{"jsonrpc":"2.0","id":99,"result":{}}"#, &pending);
        assert!(pending.lock().is_empty());
    }
}
