use crate::config::CredentialsConfig;
use crate::errors::CampboardError;
use crate::runtime::{Clock, FileSystem, ProcessRequest, ProcessRunner};
use crate::sheets::{transport_error, SourceError, SourceErrorKind};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Minted tokens are dropped this long before the issuer says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey(String),
    Bearer(String),
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    fn token_uri(&self) -> &str {
        non_empty(self.token_uri.as_deref()).unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct MintedToken {
    token: String,
    lifetime: Option<Duration>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    source: String,
    token: String,
    expires_at: SystemTime,
}

/// Resolves configured credentials into request authentication, caching
/// minted tokens between ticks.
///
/// Service-account keys are exchanged for an access token directly with the
/// OAuth token endpoint (JWT bearer grant); `token_command` shells out.
pub struct Authenticator {
    clock: Arc<dyn Clock>,
    file_system: Arc<dyn FileSystem>,
    process_runner: Arc<dyn ProcessRunner>,
    http: Option<Client>,
    cached: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub fn new(
        clock: Arc<dyn Clock>,
        file_system: Arc<dyn FileSystem>,
        process_runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            clock,
            file_system,
            process_runner,
            http: Client::builder().build().ok(),
            cached: Mutex::new(None),
        }
    }

    /// Precedence: api key, access token, inline service-account JSON,
    /// service-account key file, token command. Network and process work is
    /// bounded by `timeout`.
    pub fn resolve(
        &self,
        creds: &CredentialsConfig,
        timeout: Duration,
    ) -> Result<AuthMethod, SourceError> {
        if let Some(key) = non_empty(creds.api_key.as_deref()) {
            return Ok(AuthMethod::ApiKey(key.to_string()));
        }
        if let Some(token) = non_empty(creds.access_token.as_deref()) {
            return Ok(AuthMethod::Bearer(token.to_string()));
        }

        let ttl = Duration::from_secs(creds.token_ttl_seconds);
        if let Some(key) = self.service_account_key(creds)? {
            let source = format!("service_account:{}", key.client_email);
            if let Some(token) = self.cached_token(&source) {
                return Ok(AuthMethod::Bearer(token));
            }
            let minted = self.exchange(&key, timeout)?;
            return Ok(AuthMethod::Bearer(self.remember(source, minted, ttl)));
        }

        if let Some(command) = &creds.token_command {
            let source = format!("command:{command:?}");
            if let Some(token) = self.cached_token(&source) {
                return Ok(AuthMethod::Bearer(token));
            }
            let minted = self.run_token_command(command, timeout)?;
            return Ok(AuthMethod::Bearer(self.remember(source, minted, ttl)));
        }

        Err(SourceError::new(
            SourceErrorKind::Config,
            "missing credentials: set api_key, access_token, service_account_json, service_account_key or token_command",
        ))
    }

    /// Drops any cached token so the next call mints a fresh one.
    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CachedToken>> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached_token(&self, source: &str) -> Option<String> {
        let cache = self.lock_cache();
        let cached = cache.as_ref()?;
        (cached.source == source && self.clock.now() < cached.expires_at)
            .then(|| cached.token.clone())
    }

    fn remember(&self, source: String, minted: MintedToken, ttl: Duration) -> String {
        let lifetime = minted
            .lifetime
            .map(|lifetime| lifetime.saturating_sub(EXPIRY_MARGIN).min(ttl))
            .unwrap_or(ttl);
        *self.lock_cache() = Some(CachedToken {
            source,
            token: minted.token.clone(),
            expires_at: self.clock.now() + lifetime,
        });
        minted.token
    }

    fn service_account_key(
        &self,
        creds: &CredentialsConfig,
    ) -> Result<Option<ServiceAccountKey>, SourceError> {
        if let Some(raw) = non_empty(creds.service_account_json.as_deref()) {
            return parse_service_account(raw, "service_account_json").map(Some);
        }
        let Some(path) = &creds.service_account_key else {
            return Ok(None);
        };
        let raw = self
            .file_system
            .read_to_string(path)
            .map_err(|e| SourceError::new(SourceErrorKind::Config, e.to_string()))?;
        parse_service_account(&raw, &path.display().to_string()).map(Some)
    }

    fn exchange(&self, key: &ServiceAccountKey, timeout: Duration) -> Result<MintedToken, SourceError> {
        let token_uri = key.token_uri();
        let issued_at = unix_secs(self.clock.now());
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: READONLY_SCOPE,
            aud: token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME.as_secs(),
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            SourceError::new(
                SourceErrorKind::Config,
                format!("service account private_key is not a usable RSA key: {e}"),
            )
        })?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &signing_key)
            .map_err(|e| SourceError::new(SourceErrorKind::Auth, format!("signing failed: {e}")))?;

        let client = self.http.as_ref().ok_or_else(|| {
            SourceError::new(SourceErrorKind::Transport, "http client unavailable")
        })?;
        let response = client
            .post(token_uri)
            .timeout(timeout)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        if !status.is_success() {
            let mut err = SourceError::from_response(status.as_u16(), &body);
            if err.kind == SourceErrorKind::Api {
                err.kind = SourceErrorKind::Auth;
            }
            return Err(err);
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::new(
                SourceErrorKind::Malformed,
                format!("unexpected token response: {e}"),
            )
        })?;
        if parsed.access_token.trim().is_empty() {
            return Err(SourceError::new(
                SourceErrorKind::Auth,
                "token endpoint returned no access_token",
            ));
        }
        Ok(MintedToken {
            token: parsed.access_token,
            lifetime: parsed.expires_in.map(Duration::from_secs),
        })
    }

    fn run_token_command(&self, command: &[String], timeout: Duration) -> Result<MintedToken, SourceError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SourceError::new(
                SourceErrorKind::Config,
                "token command is empty",
            ));
        };
        let output = self
            .process_runner
            .run(ProcessRequest {
                program: program.clone(),
                args: args.to_vec(),
                timeout: Some(timeout),
            })
            .map_err(|e| match e {
                CampboardError::Timeout(message) => {
                    SourceError::new(SourceErrorKind::Timeout, format!("token command {message}"))
                }
                other => SourceError::new(SourceErrorKind::Auth, other.to_string()),
            })?;
        if output.exit_code != 0 {
            return Err(SourceError::new(
                SourceErrorKind::Auth,
                format!(
                    "token command exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        let token = output.stdout.trim();
        if token.is_empty() {
            return Err(SourceError::new(
                SourceErrorKind::Auth,
                "token command printed no token",
            ));
        }
        Ok(MintedToken {
            token: token.to_string(),
            lifetime: None,
        })
    }
}

fn parse_service_account(raw: &str, origin: &str) -> Result<ServiceAccountKey, SourceError> {
    let key: ServiceAccountKey = serde_json::from_str(raw).map_err(|e| {
        SourceError::new(
            SourceErrorKind::Config,
            format!("service account key {origin} is not valid json: {e}"),
        )
    })?;
    if key.kind != "service_account" {
        return Err(SourceError::new(
            SourceErrorKind::Config,
            format!(
                "service account key {origin} has type {:?}, expected \"service_account\"",
                key.kind
            ),
        ));
    }
    if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
        return Err(SourceError::new(
            SourceErrorKind::Config,
            format!("service account key {origin} is missing client_email or private_key"),
        ));
    }
    Ok(key)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
