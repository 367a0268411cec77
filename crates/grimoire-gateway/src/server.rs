//! The upstream stdio JSON-RPC loop: the gateway façade itself speaks
//! the same request/response framing it consumes downstream (§4.7,
//! "Upstream exposure"), so it can be registered as an ordinary
//! MCP-style server with a parent agent.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use grimoire_domain::error::Error;
use grimoire_mcp::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcResponse};

use crate::facade::GatewayFacade;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Runs the server loop until stdin closes. Interleaves request handling
/// with `notifications/tools/list_changed` pushes from the hot-reload
/// watcher.
pub async fn run(facade: Arc<GatewayFacade>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    let mut tools_changed = facade.state().tools_changed.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !line.trim().is_empty() {
                            handle_line(&facade, &line, &mut stdout).await;
                        }
                    }
                    None => break,
                }
            }
            changed = tools_changed.recv() => {
                if changed.is_ok() {
                    let notif = JsonRpcNotification::new("notifications/tools/list_changed");
                    write_value(&mut stdout, &notif).await;
                }
            }
        }
    }

    Ok(())
}

async fn handle_line(facade: &Arc<GatewayFacade>, line: &str, stdout: &mut tokio::io::Stdout) {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unparseable line on stdin");
            return;
        }
    };

    let Some(method) = parsed.get("method").and_then(Value::as_str).map(str::to_string) else {
        tracing::warn!("ignoring message with no method");
        return;
    };
    let params = parsed.get("params").cloned();

    let Some(id) = parsed.get("id").and_then(Value::as_u64) else {
        // A fire-and-forget notification from the host, e.g.
        // `notifications/initialized`. Nothing upstream needs a reply.
        tracing::debug!(method, "received notification");
        return;
    };

    let response = match dispatch(facade, &method, params).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    };
    write_value(stdout, &response).await;
}

async fn dispatch(facade: &Arc<GatewayFacade>, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "grimoire", "version": "1.0.0" },
        })),
        "tools/list" => Ok(json!({ "tools": list_tools(facade) })),
        "tools/call" => call_tool(facade, params).await,
        other => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn list_tools(facade: &Arc<GatewayFacade>) -> Vec<Value> {
    let mut tools: Vec<Value> = facade
        .facade_tool_descriptors()
        .iter()
        .map(|tool| serde_json::to_value(tool).unwrap_or(Value::Null))
        .collect();

    // Per invariant I3, currently active spells' tools are listed too.
    let state = facade.state();
    for name in state.lifecycle.active_spell_names() {
        let Some(active_tools) = state.lifecycle.get_active_tools(&name) else {
            continue;
        };
        let steering = state.resolver.get_config(&name).and_then(|c| c.steering);
        for tool in active_tools {
            let steered = tool.with_steering(steering.as_deref());
            tools.push(serde_json::to_value(steered).unwrap_or(Value::Null));
        }
    }
    tools
}

async fn call_tool(facade: &Arc<GatewayFacade>, params: Option<Value>) -> Result<Value, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "tools/call requires params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "tools/call requires a tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "resolve_intent" => {
            let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
            Ok(tool_result(facade.resolve_intent(query).await))
        }
        "activate_spell" => {
            let spell_name = arguments.get("name").and_then(Value::as_str).unwrap_or("");
            match facade.activate_spell(spell_name).await {
                Ok(value) => Ok(tool_result(value)),
                Err(err) => Ok(tool_error(&err)),
            }
        }
        tool_name => Ok(dispatch_passthrough(facade, tool_name, arguments).await),
    }
}

/// Routes a non-façade tool name through C6 to the owning spell's
/// transport (§4.7, "C6's router → C5's `call_tool` passthrough").
async fn dispatch_passthrough(facade: &Arc<GatewayFacade>, tool_name: &str, arguments: Value) -> Value {
    let state = facade.state();
    let Some(spell_name) = state.router.find_spell_for_tool(tool_name) else {
        return tool_error(&Error::InvalidInput(format!("unknown tool: {tool_name}")));
    };

    match state.lifecycle.call_tool(&spell_name, tool_name, arguments).await {
        Ok(result) => {
            state.lifecycle.mark_used(&spell_name);
            result
        }
        Err(err) => tool_error(&err),
    }
}

/// Wraps a façade tool's raw JSON result in MCP's `tools/call` content
/// envelope: a single text block carrying the JSON-serialized value.
fn tool_result(value: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": value.to_string() }],
        "isError": false,
    })
}

fn tool_error(err: &Error) -> Value {
    json!({
        "content": [{ "type": "text", "text": err.to_string() }],
        "isError": true,
    })
}

async fn write_value(stdout: &mut tokio::io::Stdout, value: &impl serde::Serialize) {
    let Ok(mut line) = serde_json::to_string(value) else {
        tracing::warn!("failed to serialize outgoing message");
        return;
    };
    line.push('\n');
    if let Err(err) = stdout.write_all(line.as_bytes()).await {
        tracing::warn!(error = %err, "failed to write to stdout");
        return;
    }
    let _ = stdout.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_wraps_value_as_text_content() {
        let wrapped = tool_result(json!({ "status": "activated" }));
        assert_eq!(wrapped["isError"], false);
        assert_eq!(wrapped["content"][0]["type"], "text");
        assert!(wrapped["content"][0]["text"].as_str().unwrap().contains("activated"));
    }

    #[test]
    fn tool_error_marks_is_error_true() {
        let wrapped = tool_error(&Error::SpellNotFound("weather".into()));
        assert_eq!(wrapped["isError"], true);
        assert!(wrapped["content"][0]["text"].as_str().unwrap().contains("weather"));
    }
}
