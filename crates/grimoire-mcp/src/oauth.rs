//! Access-token providers for remote spell servers: client-credentials,
//! private-key JWT assertion, and static JWT assertion.
//!
//! Each provider caches its token until shortly before expiry and
//! refreshes lazily on the next call, following the same shape as a
//! device-code token store, but without ever persisting to disk — these
//! tokens are short-lived and spell-scoped, not account-scoped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

use grimoire_domain::error::{Error, Result};
use grimoire_domain::spell::AuthConfig;

/// A source of bearer-token strings for an authenticated remote spell.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_access_token(&self) -> Result<String>;
}

/// A cached token plus its expiry instant. `expires_at` is set a little
/// earlier than the server's advertised expiry to refresh proactively.
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// `grant_type=client_credentials` against `token_url`, authenticated
/// with HTTP Basic `client_id:client_secret`.
pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(token_url: String, client_id: String, client_secret: String, scope: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url,
            client_id,
            client_secret,
            scope,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "token request to {} failed with status {}",
                self.token_url,
                response.status()
            )));
        }

        let parsed: TokenResponse = response.json().await.map_err(|err| Error::Http(err.to_string()))?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in).saturating_sub(EXPIRY_SKEW),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.access_token.clone();
        *self.cache.lock() = Some(fresh);
        Ok(token)
    }
}

/// Builds a signed JWT assertion over `{iss, sub, aud, exp, jti}` and
/// exchanges it for an access token via the
/// `client_assertion_type=urn:ietf:params:oauth:client-assertion-type:jwt-bearer`
/// grant extension.
pub struct PrivateKeyJwtProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(serde::Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: usize,
    jti: String,
}

impl PrivateKeyJwtProvider {
    pub fn new(token_url: String, client_id: String, private_key_pem: &str, algorithm: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|err| Error::Config(format!("invalid private key for JWT assertion: {err}")))?;
        let algorithm = parse_algorithm(algorithm)?;
        Ok(Self {
            http: reqwest::Client::new(),
            token_url,
            client_id,
            encoding_key,
            algorithm,
            cache: Mutex::new(None),
        })
    }

    fn build_assertion(&self) -> Result<String> {
        let exp = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + 300) as usize;
        let claims = JwtClaims {
            iss: &self.client_id,
            sub: &self.client_id,
            aud: &self.token_url,
            exp,
            jti: Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|err| Error::Other(format!("failed to sign JWT assertion: {err}")))
    }

    async fn exchange(&self, assertion: &str) -> Result<CachedToken> {
        let form = [
            ("grant_type", "client_credentials"),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", assertion),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "token request to {} failed with status {}",
                self.token_url,
                response.status()
            )));
        }

        let parsed: TokenResponse = response.json().await.map_err(|err| Error::Http(err.to_string()))?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in).saturating_sub(EXPIRY_SKEW),
        })
    }
}

#[async_trait]
impl TokenProvider for PrivateKeyJwtProvider {
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        let assertion = self.build_assertion()?;
        let fresh = self.exchange(&assertion).await?;
        let token = fresh.access_token.clone();
        *self.cache.lock() = Some(fresh);
        Ok(token)
    }
}

/// Like [`PrivateKeyJwtProvider`], but the assertion is supplied
/// verbatim by configuration rather than signed at request time.
pub struct StaticPrivateKeyJwtProvider {
    http: reqwest::Client,
    token_url: String,
    assertion: String,
    cache: Mutex<Option<CachedToken>>,
}

impl StaticPrivateKeyJwtProvider {
    pub fn new(token_url: String, assertion: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url,
            assertion,
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticPrivateKeyJwtProvider {
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        let form = [
            ("grant_type", "client_credentials"),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", self.assertion.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "token request to {} failed with status {}",
                self.token_url,
                response.status()
            )));
        }
        let parsed: TokenResponse = response.json().await.map_err(|err| Error::Http(err.to_string()))?;
        let token = parsed.access_token.clone();
        *self.cache.lock() = Some(CachedToken {
            access_token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in).saturating_sub(EXPIRY_SKEW),
        });
        Ok(token)
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(Error::Config(format!("unsupported JWT algorithm: {other}"))),
    }
}

/// Builds the appropriate token provider for `auth`, or `None` if the
/// variant carries no OAuth leg (e.g. `bearer`/`basic`/`none`), or if a
/// required field expands to blank (an unset `${VAR}` expands to `""`
/// rather than erroring, so this is the only place that notices). A
/// provider with a missing required field is not constructed; the
/// caller treats `None` the same as "no OAuth leg".
pub fn build_token_provider(auth: &AuthConfig) -> Result<Option<Arc<dyn TokenProvider>>> {
    match auth {
        AuthConfig::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
        } => {
            let token_url = grimoire_domain::env::expand_env_var(token_url);
            let client_id = grimoire_domain::env::expand_env_var(client_id);
            let client_secret = grimoire_domain::env::expand_env_var(client_secret);
            if token_url.is_empty() || client_id.is_empty() || client_secret.is_empty() {
                return Ok(None);
            }
            Ok(Some(Arc::new(ClientCredentialsProvider::new(
                token_url,
                client_id,
                client_secret,
                scope.clone(),
            ))))
        }
        AuthConfig::PrivateKeyJwt {
            token_url,
            client_id,
            private_key_pem,
            algorithm,
        } => {
            let token_url = grimoire_domain::env::expand_env_var(token_url);
            let client_id = grimoire_domain::env::expand_env_var(client_id);
            let private_key_pem = grimoire_domain::env::expand_env_var(private_key_pem);
            if token_url.is_empty() || client_id.is_empty() || private_key_pem.is_empty() {
                return Ok(None);
            }
            Ok(Some(Arc::new(PrivateKeyJwtProvider::new(
                token_url,
                client_id,
                &private_key_pem,
                algorithm,
            )?)))
        }
        AuthConfig::StaticPrivateKeyJwt { token_url, assertion } => {
            let token_url = grimoire_domain::env::expand_env_var(token_url);
            let assertion = grimoire_domain::env::expand_env_var(assertion);
            if token_url.is_empty() || assertion.is_empty() {
                return Ok(None);
            }
            Ok(Some(Arc::new(StaticPrivateKeyJwtProvider::new(token_url, assertion))))
        }
        AuthConfig::None | AuthConfig::Bearer { .. } | AuthConfig::Basic { .. } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_debug_redacts_access_token() {
        let cached = CachedToken {
            access_token: "super-secret-token".into(),
            expires_at: Instant::now(),
        };
        let debug = format!("{cached:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn parse_algorithm_accepts_known_names() {
        assert!(matches!(parse_algorithm("RS256"), Ok(Algorithm::RS256)));
        assert!(parse_algorithm("HS256-not-supported").is_err());
    }

    #[test]
    fn build_token_provider_none_for_plain_auth() {
        assert!(build_token_provider(&AuthConfig::None).unwrap().is_none());
        assert!(build_token_provider(&AuthConfig::Bearer { token: "t".into() })
            .unwrap()
            .is_none());
    }

    #[test]
    fn build_token_provider_some_for_client_credentials() {
        let auth = AuthConfig::ClientCredentials {
            token_url: "https://auth.example.com/token".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            scope: None,
        };
        assert!(build_token_provider(&auth).unwrap().is_some());
    }

    #[test]
    fn build_token_provider_none_for_client_credentials_with_blank_secret() {
        let auth = AuthConfig::ClientCredentials {
            token_url: "https://auth.example.com/token".into(),
            client_id: "id".into(),
            // Simulates an unset ${VAR} expanding to "".
            client_secret: "".into(),
            scope: None,
        };
        assert!(build_token_provider(&auth).unwrap().is_none());
    }

    #[test]
    fn build_token_provider_none_for_client_credentials_with_unset_env_var() {
        let auth = AuthConfig::ClientCredentials {
            token_url: "https://auth.example.com/token".into(),
            client_id: "id".into(),
            client_secret: "${GRIMOIRE_TEST_UNSET_CLIENT_SECRET}".into(),
            scope: None,
        };
        assert!(build_token_provider(&auth).unwrap().is_none());
    }

    #[test]
    fn build_token_provider_none_for_private_key_jwt_with_blank_key() {
        let auth = AuthConfig::PrivateKeyJwt {
            token_url: "https://auth.example.com/token".into(),
            client_id: "id".into(),
            private_key_pem: "".into(),
            algorithm: "RS256".into(),
        };
        assert!(build_token_provider(&auth).unwrap().is_none());
    }

    #[test]
    fn build_token_provider_none_for_static_jwt_with_blank_assertion() {
        let auth = AuthConfig::StaticPrivateKeyJwt {
            token_url: "https://auth.example.com/token".into(),
            assertion: "".into(),
        };
        assert!(build_token_provider(&auth).unwrap().is_none());
    }

    #[test]
    fn build_token_provider_none_for_static_jwt_with_blank_token_url() {
        let auth = AuthConfig::StaticPrivateKeyJwt {
            token_url: "".into(),
            assertion: "some-assertion".into(),
        };
        assert!(build_token_provider(&auth).unwrap().is_none());
    }
}
