//! OAuth2 authorization-code flow with encrypted token persistence.
//!
//! Per session the flow moves through:
//!
//! - **Unauthorized** -> **AuthorizationRequested** via
//!   [`OAuthFlow::build_authorization_url`] (`state` = session id, nothing persisted)
//! - **AuthorizationRequested** -> **Authorized** via [`OAuthFlow::exchange_code`]
//!   (credential persisted under the session id)
//! - **AuthorizationRequested** -> **Unauthorized** when the provider returns
//!   an error or the `state` does not match ([`OAuthFlow::verify_callback`])
//! - **Authorized** -> **Authorized** via [`OAuthFlow::get_credentials`], which
//!   refreshes and re-persists an expired credential
//!
//! Nothing is retried. A failed exchange or refresh goes back to the caller,
//! which restarts the flow.

use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Client, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::error::{OAuthError, Result};
use super::provider::{OAuthApp, OAuthProvider};
use crate::storage::{StoredCredential, TokenStore};

/// Maximum length for provider error bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Default connect timeout for token endpoint requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for token endpoint requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for `expires_in` (1 year), keeps the chrono arithmetic in range.
const MAX_EXPIRES_IN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Truncates a provider error body so token material never floods the logs.
fn sanitize_oauth_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Creates an HTTP client with appropriate timeouts.
pub(crate) fn create_http_client() -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
}

/// Response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Lifetime in seconds of the access token.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Not every grant returns one; refreshes usually omit it.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Space-separated list of granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Drives the authorization-code flow and owns credential persistence.
pub struct OAuthFlow {
    client: Client,
    provider: OAuthProvider,
    tokens: TokenStore,
}

impl OAuthFlow {
    pub fn new(provider: OAuthProvider, tokens: TokenStore) -> Result<Self> {
        let client = create_http_client()
            .map_err(|e| OAuthError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider,
            tokens,
        })
    }

    pub fn provider(&self) -> &OAuthProvider {
        &self.provider
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.tokens
    }

    /// Builds the consent URL for `session_id`.
    ///
    /// `access_type=offline` plus `prompt=consent` make the provider issue a
    /// refresh token even when the user already consented before.
    pub fn build_authorization_url(&self, session_id: &str, app: &OAuthApp) -> Result<Url> {
        if !app.is_complete() {
            return Err(OAuthError::MissingClientCredentials);
        }

        let scope = self.provider.scope_param();
        let url = Url::parse_with_params(
            &self.provider.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", app.client_id.as_str()),
                ("redirect_uri", app.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", session_id),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| OAuthError::InvalidUrl(format!("{}: {}", self.provider.auth_url, e)))?;

        debug!("Built authorization URL for client {}", app.client_id);
        Ok(url)
    }

    /// Validates the redirect back from the provider and returns the code.
    ///
    /// The `state` check runs first: a callback for another session is
    /// rejected before its error or code is even looked at.
    pub fn verify_callback(session_id: &str, params: &CallbackParams) -> Result<String> {
        if session_id.is_empty() || params.state != session_id {
            warn!("Rejecting OAuth callback with mismatched state");
            return Err(OAuthError::StateMismatch);
        }

        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            info!("Provider returned authorization error: {}", error);
            return Err(OAuthError::ProviderDenied(error.to_string()));
        }

        params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or(OAuthError::MissingCode)
    }

    /// Exchanges an authorization code and persists the credential under `session_id`.
    #[tracing::instrument(name = "oauth.exchange_code", skip_all)]
    pub async fn exchange_code(
        &self,
        session_id: &str,
        code: &str,
        app: &OAuthApp,
    ) -> Result<StoredCredential> {
        if !app.is_complete() {
            return Err(OAuthError::MissingClientCredentials);
        }

        info!("Exchanging authorization code");

        let params = [
            ("code", code),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.expose_secret()),
            ("redirect_uri", app.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token = self.request_token(&self.provider.token_url, &params).await?;

        let credential = StoredCredential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_uri: self.provider.token_url.clone(),
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.expose_secret().to_string(),
            scopes: granted_scopes(token.scope.as_deref(), &self.provider.scopes),
            expiry: expiry_from(token.expires_in),
        };

        if credential.refresh_token.is_none() {
            warn!("Provider did not issue a refresh token; re-authorization will be needed on expiry");
        }

        self.tokens.save_credentials(session_id, &credential)?;
        info!("Stored credential for session");
        Ok(credential)
    }

    /// Loads the session's credential, refreshing it first when expired.
    ///
    /// `Ok(None)` means the session has never authorized (or was reset) and
    /// the flow must start over.
    #[tracing::instrument(name = "oauth.get_credentials", skip_all)]
    pub async fn get_credentials(&self, session_id: &str) -> Result<Option<StoredCredential>> {
        let Some(credential) = self.tokens.load_credentials(session_id) else {
            debug!("No stored credential for session");
            return Ok(None);
        };

        if !credential.is_expired(0) || !credential.can_refresh() {
            return Ok(Some(credential));
        }

        let refreshed = self.refresh(credential).await?;
        self.tokens.save_credentials(session_id, &refreshed)?;
        Ok(Some(refreshed))
    }

    /// Refreshes `credential` against the token endpoint it was issued by.
    async fn refresh(&self, credential: StoredCredential) -> Result<StoredCredential> {
        info!("Refreshing access token");

        let refresh_token = credential.refresh_token.clone().unwrap_or_default();
        let params = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let token = self.request_token(&credential.token_uri, &params).await?;

        info!("Successfully refreshed access token");
        Ok(StoredCredential {
            access_token: token.access_token,
            // Providers usually omit the refresh token on refresh; keep ours
            refresh_token: token.refresh_token.or(credential.refresh_token),
            scopes: granted_scopes(token.scope.as_deref(), &credential.scopes),
            expiry: expiry_from(token.expires_in),
            ..credential
        })
    }

    async fn request_token(&self, token_url: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = sanitize_oauth_error_body(&body);
            warn!("Token endpoint returned {}: {}", status, body);
            return Err(OAuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "Token response carried an empty access token".to_string(),
            ));
        }

        Ok(token)
    }
}

fn expiry_from(expires_in: Option<u64>) -> Option<chrono::DateTime<Utc>> {
    expires_in.map(|secs| {
        Utc::now() + chrono::Duration::seconds(secs.min(MAX_EXPIRES_IN_SECONDS) as i64)
    })
}

fn granted_scopes(scope: Option<&str>, fallback: &[String]) -> Vec<String> {
    match scope {
        Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
        _ => fallback.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::TokenEncryptor;
    use crate::storage::EncryptedKvStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn flow_in(dir: &TempDir) -> OAuthFlow {
        let encryptor = Arc::new(
            TokenEncryptor::from_base64_key("MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA=")
                .unwrap(),
        );
        let tokens =
            TokenStore::new(EncryptedKvStore::open(dir.path().join("t.json"), encryptor).unwrap());
        OAuthFlow::new(OAuthProvider::google(), tokens).unwrap()
    }

    fn app() -> OAuthApp {
        OAuthApp::new(
            "my-client.apps.googleusercontent.com",
            "secret",
            "http://localhost:8000/auth/google/callback",
        )
    }

    #[test]
    fn test_authorization_url_parameters() {
        let dir = TempDir::new().unwrap();
        let url = flow_in(&dir)
            .build_authorization_url("session-123", &app())
            .unwrap();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "my-client.apps.googleusercontent.com");
        assert_eq!(query["redirect_uri"], "http://localhost:8000/auth/google/callback");
        assert_eq!(query["scope"], "https://www.googleapis.com/auth/gmail.send");
        assert_eq!(query["state"], "session-123");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["response_type"], "code");
        assert!(!query.contains_key("client_secret"));
    }

    #[test]
    fn test_authorization_url_requires_app_credentials() {
        let dir = TempDir::new().unwrap();
        let incomplete = OAuthApp::new("id", "", "http://localhost/cb");
        assert!(matches!(
            flow_in(&dir).build_authorization_url("s", &incomplete),
            Err(OAuthError::MissingClientCredentials)
        ));
    }

    #[test]
    fn test_verify_callback_state_checked_first() {
        let params = CallbackParams {
            state: "someone-else".to_string(),
            code: Some("code".to_string()),
            error: Some("access_denied".to_string()),
        };
        assert!(matches!(
            OAuthFlow::verify_callback("mine", &params),
            Err(OAuthError::StateMismatch)
        ));

        // Empty session id never matches, even an empty state
        assert!(matches!(
            OAuthFlow::verify_callback("", &CallbackParams::default()),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_verify_callback_outcomes() {
        let denied = CallbackParams {
            state: "mine".to_string(),
            code: None,
            error: Some("access_denied".to_string()),
        };
        assert!(matches!(
            OAuthFlow::verify_callback("mine", &denied),
            Err(OAuthError::ProviderDenied(e)) if e == "access_denied"
        ));

        let missing = CallbackParams {
            state: "mine".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OAuthFlow::verify_callback("mine", &missing),
            Err(OAuthError::MissingCode)
        ));

        let ok = CallbackParams {
            state: "mine".to_string(),
            code: Some("4/abc".to_string()),
            error: None,
        };
        assert_eq!(OAuthFlow::verify_callback("mine", &ok).unwrap(), "4/abc");
    }

    #[tokio::test]
    async fn test_get_credentials_absent() {
        let dir = TempDir::new().unwrap();
        assert!(flow_in(&dir).get_credentials("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_credentials_returns_valid_credential_without_network() {
        let dir = TempDir::new().unwrap();
        let flow = flow_in(&dir);
        let credential = StoredCredential {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            // Unroutable: any refresh attempt would fail the test
            token_uri: "http://127.0.0.1:1/token".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![],
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        flow.token_store().save_credentials("s", &credential).unwrap();

        assert_eq!(flow.get_credentials("s").await.unwrap(), Some(credential));
    }

    #[test]
    fn test_sanitize_error_body() {
        assert_eq!(sanitize_oauth_error_body("short"), "short");
        let long = "é".repeat(150);
        let sanitized = sanitize_oauth_error_body(&long);
        assert!(sanitized.ends_with("... (truncated)"));
        assert!(sanitized.len() < long.len());
    }

    #[test]
    fn test_granted_scopes() {
        let fallback = vec!["fallback".to_string()];
        assert_eq!(granted_scopes(Some("a b"), &fallback), vec!["a", "b"]);
        assert_eq!(granted_scopes(Some(" "), &fallback), fallback);
        assert_eq!(granted_scopes(None, &fallback), fallback);
    }
}
