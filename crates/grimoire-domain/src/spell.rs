use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single `*.spell.yaml` document: the declaration of one downstream
/// tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub steering: Option<String>,
}

impl SpellConfig {
    /// The text embedded for semantic indexing: the description followed
    /// by the keywords, with the keyword list repeated once to bias
    /// scoring toward keyword emphasis.
    pub fn embedding_text(&self) -> String {
        let keywords = self.keywords.join(" ");
        format!("{} {} {}", self.description, keywords, keywords)
    }

    /// `sha256(description + "|" + keywords.join(","))`, used for
    /// change-detection against the embedding store.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.description.as_bytes());
        hasher.update(b"|");
        hasher.update(self.keywords.join(",").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn is_stdio(&self) -> bool {
        matches!(self.server, ServerConfig::Stdio { .. })
    }
}

/// Tagged union over the two ways a spell server can be reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Tagged union over the supported authentication strategies for remote
/// transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
    },
    PrivateKeyJwt {
        token_url: String,
        client_id: String,
        private_key_pem: String,
        #[serde(default = "default_jwt_alg")]
        algorithm: String,
    },
    StaticPrivateKeyJwt {
        token_url: String,
        assertion: String,
    },
}

fn default_jwt_alg() -> String {
    "RS256".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SpellConfig {
        SpellConfig {
            name: "weather".into(),
            version: "1.0.0".into(),
            description: "Look up current weather conditions".into(),
            keywords: vec!["weather".into(), "forecast".into()],
            server: ServerConfig::Stdio {
                command: "weather-spell".into(),
                args: vec![],
                env: HashMap::new(),
            },
            auth: None,
            steering: None,
        }
    }

    #[test]
    fn hash_changes_with_description() {
        let a = sample();
        let mut b = sample();
        b.description = "Different description".into();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_changes_with_keywords() {
        let a = sample();
        let mut b = sample();
        b.keywords.push("rain".into());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_stable_across_clones() {
        let a = sample();
        let b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn embedding_text_repeats_keywords() {
        let s = sample();
        let text = s.embedding_text();
        assert_eq!(text.matches("weather").count(), 2 + 1); // description + 2x keyword list
    }

    #[test]
    fn deserializes_stdio_server() {
        let yaml = r#"
name: weather
version: 1.0.0
description: Look up current weather
keywords: [weather, forecast]
server:
  type: stdio
  command: weather-spell
  args: ["--verbose"]
"#;
        let config: SpellConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.is_stdio());
    }

    #[test]
    fn deserializes_remote_server_with_basic_auth() {
        let yaml = r#"
name: crm
version: 2.1.0
description: Query the CRM
keywords: [crm, customer, lookup]
server:
  type: sse
  url: https://example.com/mcp
auth:
  type: basic
  username: svc
  password: "${CRM_PASSWORD}"
"#;
        let config: SpellConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.is_stdio());
        match config.auth {
            Some(AuthConfig::Basic { username, .. }) => assert_eq!(username, "svc"),
            other => panic!("unexpected auth variant: {other:?}"),
        }
    }
}
