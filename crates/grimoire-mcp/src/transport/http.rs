use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use super::sse::drain_data_lines;
use super::{McpTransport, TransportError};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Streamable-HTTP transport: each request is a single `POST` whose
/// response is either a plain JSON body (the common case) or a
/// single-use `text/event-stream` body carrying exactly the matching
/// response, per the MCP streamable-HTTP transport. Unlike [`super::SseTransport`]
/// there is no persistent connection to maintain.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Self, TransportError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|err| TransportError::Http(err.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|err| TransportError::Http(err.to_string()))?;
            map.insert(name, value);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers: map,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn parse_response(&self, response: reqwest::Response, expected_id: u64) -> Result<JsonRpcResponse, TransportError> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let mut response = response;
            let mut buffer = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_data_lines(&mut buffer) {
                            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data) {
                                if resp.id == expected_id {
                                    return Ok(resp);
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        return Err(TransportError::Http("event stream ended without a matching response".into()));
                    }
                    Err(err) => return Err(TransportError::Http(err.to_string())),
                }
            }
        } else {
            let body: JsonRpcResponse = response
                .json()
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?;
            Ok(body)
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let id = self.next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let send = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&req);

        let response = tokio::time::timeout(tokio::time::Duration::from_secs(30), send.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "POST to {} failed with status {}",
                self.url,
                response.status()
            )));
        }

        self.parse_response(response, id).await
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&notif)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "notification POST to {} failed with status {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
