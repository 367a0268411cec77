//! Activation: turning a [`SpellConfig`] into a connected transport plus
//! its discovered tool list.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;

use grimoire_domain::env::expand_env_var;
use grimoire_domain::error::{Error, Result};
use grimoire_domain::spell::{AuthConfig, ServerConfig, SpellConfig};
use grimoire_domain::tool::ToolDescriptor;

use crate::oauth::build_token_provider;
use crate::protocol::{initialize_params, McpToolDef, ToolsListResult};
use crate::transport::{HttpTransport, McpTransport, SseTransport, StdioTransport, TransportError};

/// A spell that has been spawned/connected and had its tools discovered.
pub struct ActiveSpell {
    pub name: String,
    pub tools: Vec<ToolDescriptor>,
    pub transport: Arc<dyn McpTransport>,
    pub pid: Option<u32>,
}

/// Connects to `config`'s declared server and runs the MCP handshake
/// (`initialize` -> `notifications/initialized` -> `tools/list`).
pub async fn activate(config: &SpellConfig, connect_timeout: std::time::Duration) -> Result<ActiveSpell> {
    let is_stdio = config.is_stdio();
    let result = tokio::time::timeout(connect_timeout, connect_and_initialize(config)).await;

    match result {
        Ok(Ok(active)) => Ok(active),
        Ok(Err(err)) => Err(to_activation_error(&config.name, is_stdio, err)),
        Err(_) => Err(Error::ActivationError {
            name: config.name.clone(),
            message: "connection attempt timed out".into(),
            fix: Error::activation_fix(is_stdio, "timeout"),
        }),
    }
}

async fn connect_and_initialize(config: &SpellConfig) -> std::result::Result<ActiveSpell, TransportError> {
    let (transport, pid): (Arc<dyn McpTransport>, Option<u32>) = match &config.server {
        ServerConfig::Stdio { command, args, env } => {
            let expanded_env: HashMap<String, String> = env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env_var(v)))
                .collect();
            let stdio = StdioTransport::spawn(command, args, &expanded_env)?;
            let pid = stdio.pid().await;
            (Arc::new(stdio), pid)
        }
        ServerConfig::Sse { url, headers } => {
            let headers = build_headers(headers, config.auth.as_ref())
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?;
            let sse = SseTransport::connect(url, &headers).await?;
            (Arc::new(sse), None)
        }
        ServerConfig::Http { url, headers } => {
            let headers = build_headers(headers, config.auth.as_ref())
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?;
            let http = HttpTransport::new(url, &headers)?;
            (Arc::new(http), None)
        }
    };

    let tools = initialize_and_list_tools(transport.as_ref(), &config.name).await?;

    Ok(ActiveSpell {
        name: config.name.clone(),
        tools,
        transport,
        pid,
    })
}

/// Runs the MCP handshake against an already-connected transport and
/// returns its tool list. Handshake failures never hard-fail discovery:
/// if `tools/list` itself fails, we log and return an empty tool list,
/// matching the teacher's tolerant-discovery behavior.
async fn initialize_and_list_tools(
    transport: &dyn McpTransport,
    spell_name: &str,
) -> std::result::Result<Vec<ToolDescriptor>, TransportError> {
    let params = initialize_params(spell_name);
    let init_response = transport
        .send_request("initialize", Some(serde_json::to_value(&params)?))
        .await?;
    if init_response.is_error() {
        tracing::warn!(spell = spell_name, "initialize returned an error, continuing anyway");
    }

    transport.send_notification("notifications/initialized").await?;

    match transport.send_request("tools/list", None).await {
        Ok(response) if !response.is_error() => {
            let result = response.into_result().ok().unwrap_or(serde_json::Value::Null);
            match serde_json::from_value::<ToolsListResult>(result) {
                Ok(parsed) => Ok(parsed.tools.into_iter().map(to_tool_descriptor).collect()),
                Err(err) => {
                    tracing::warn!(spell = spell_name, error = %err, "failed to parse tools/list result");
                    Ok(Vec::new())
                }
            }
        }
        Ok(response) => {
            tracing::warn!(spell = spell_name, error = ?response.error, "tools/list returned an error");
            Ok(Vec::new())
        }
        Err(err) => {
            tracing::warn!(spell = spell_name, error = %err, "tools/list request failed");
            Ok(Vec::new())
        }
    }
}

fn to_tool_descriptor(def: McpToolDef) -> ToolDescriptor {
    ToolDescriptor {
        name: def.name,
        description: def.description,
        input_schema: def.input_schema,
    }
}

/// Builds the outbound headers for a remote transport: the declared
/// static headers (env-expanded) plus whatever the `auth` variant adds.
async fn build_headers(
    declared: &HashMap<String, String>,
    auth: Option<&AuthConfig>,
) -> Result<HashMap<String, String>> {
    let mut headers: HashMap<String, String> = declared
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_var(v)))
        .collect();

    match auth {
        None | Some(AuthConfig::None) => {}
        Some(AuthConfig::Bearer { token }) => {
            headers.insert("Authorization".into(), format!("Bearer {}", expand_env_var(token)));
        }
        Some(AuthConfig::Basic { username, password }) => {
            let user = expand_env_var(username);
            let pass = expand_env_var(password);
            if !user.is_empty() && !pass.is_empty() {
                // Compatibility quirk, preserved intentionally: this
                // downstream server family expects Basic credentials
                // carried in a Bearer-prefixed header.
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                headers.insert("Authorization".into(), format!("Bearer {encoded}"));
            }
        }
        Some(other @ (AuthConfig::ClientCredentials { .. }
        | AuthConfig::PrivateKeyJwt { .. }
        | AuthConfig::StaticPrivateKeyJwt { .. })) => {
            if let Some(provider) = build_token_provider(other)? {
                let token = provider.get_access_token().await?;
                headers.insert("Authorization".into(), format!("Bearer {token}"));
            }
        }
    }

    Ok(headers)
}

fn to_activation_error(name: &str, is_stdio: bool, err: TransportError) -> Error {
    let message = err.to_string();
    let fix = Error::activation_fix(is_stdio, &message);
    Error::ActivationError {
        name: name.to_string(),
        message,
        fix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn build_headers_basic_auth_uses_bearer_prefix_quirk() {
        let auth = AuthConfig::Basic {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let headers = build_headers(&HashMap::new(), Some(&auth)).await.unwrap();
        let value = headers.get("Authorization").unwrap();
        assert!(value.starts_with("Bearer "));
        assert!(!value.starts_with("Basic "));
    }

    #[tokio::test]
    async fn build_headers_basic_auth_missing_password_drops_header() {
        let auth = AuthConfig::Basic {
            username: "svc".into(),
            password: "".into(),
        };
        let headers = build_headers(&HashMap::new(), Some(&auth)).await.unwrap();
        assert!(!headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn build_headers_bearer_expands_env_var() {
        std::env::set_var("GRIMOIRE_TEST_TOKEN", "abc123");
        let auth = AuthConfig::Bearer {
            token: "${GRIMOIRE_TEST_TOKEN}".into(),
        };
        let headers = build_headers(&HashMap::new(), Some(&auth)).await.unwrap();
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer abc123");
        std::env::remove_var("GRIMOIRE_TEST_TOKEN");
    }

    #[tokio::test]
    async fn build_headers_none_auth_produces_no_authorization_header() {
        let headers = build_headers(&HashMap::new(), Some(&AuthConfig::None)).await.unwrap();
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn activation_error_carries_fix_hint_for_enoent() {
        let err = to_activation_error("weather", true, TransportError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory (os error 2)")));
        match err {
            Error::ActivationError { fix, .. } => assert!(fix.contains("not found")),
            _ => panic!("expected ActivationError"),
        }
    }
}
