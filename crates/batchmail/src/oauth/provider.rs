//! Provider endpoints and OAuth app credentials.

use secrecy::{ExposeSecret, SecretString};

/// Google authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Send-only Gmail scope. Reading mail is never requested.
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Authorization server endpoints plus the scopes we ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProvider {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

impl OAuthProvider {
    /// Google with the Gmail send scope.
    pub fn google() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: vec![GMAIL_SEND_SCOPE.to_string()],
        }
    }

    /// Any authorization server, e.g. a local stand-in during tests.
    pub fn with_custom_urls(auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            scopes: vec![GMAIL_SEND_SCOPE.to_string()],
        }
    }

    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

impl Default for OAuthProvider {
    fn default() -> Self {
        Self::google()
    }
}

/// The OAuth application a flow runs under.
///
/// Either the process-wide app from settings or one the user supplied for
/// their own session.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

impl OAuthApp {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// True when both the client id and secret are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}
