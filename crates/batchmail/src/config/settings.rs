use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::oauth::OAuthApp;
use crate::secrets::{resolve_secret, resolve_secret_optional, TokenEncryptor};

/// Prefix of every environment variable read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "BATCH_APP_";

pub const DEFAULT_APP_NAME: &str = "Email Batch Assistant";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/auth/google/callback";
pub const DEFAULT_TOKEN_STORAGE_PATH: &str = "data/token_store.json";
pub const DEFAULT_PENDING_STORAGE_PATH: &str = "data/pending_credentials.json";
pub const DEFAULT_SESSION_LIFETIME_MINUTES: u64 = 120;

/// Runtime configuration.
///
/// The Google client id/secret are optional: without them every user must
/// supply their own OAuth app for their session.
#[derive(Clone)]
pub struct Settings {
    pub app_name: String,
    /// Signing key for the web layer's session cookie.
    pub secret_key: SecretString,
    /// Base64 AES-256 key for the token and pending-credential files.
    pub encryption_key: SecretString,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub google_redirect_uri: String,
    pub token_storage_path: PathBuf,
    pub pending_storage_path: PathBuf,
    pub session_lifetime_minutes: u64,
}

/// On-disk / environment shape before secrets are resolved.
///
/// Each secret can be given inline or through a `*_file` path.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    app_name: Option<String>,
    secret_key: Option<String>,
    secret_key_file: Option<String>,
    encryption_key: Option<String>,
    encryption_key_file: Option<String>,
    google_client_id: Option<String>,
    google_client_secret: Option<String>,
    google_client_secret_file: Option<String>,
    google_redirect_uri: Option<String>,
    token_storage_path: Option<PathBuf>,
    pending_storage_path: Option<PathBuf>,
    session_lifetime_minutes: Option<u64>,
}

impl Settings {
    /// Reads `BATCH_APP_*` environment variables.
    ///
    /// `BATCH_APP_FERNET_KEY` is accepted when `BATCH_APP_ENCRYPTION_KEY`
    /// is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_lifetime_minutes = match env("SESSION_LIFETIME_MINUTES") {
            Some(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ConfigError::Validation {
                    message: format!(
                        "{}SESSION_LIFETIME_MINUTES must be a whole number of minutes: {}",
                        ENV_PREFIX, e
                    ),
                }
            })?),
            None => None,
        };

        let raw = RawSettings {
            app_name: env("APP_NAME"),
            secret_key: env("SECRET_KEY"),
            secret_key_file: env("SECRET_KEY_FILE"),
            encryption_key: env("ENCRYPTION_KEY").or_else(|| env("FERNET_KEY")),
            encryption_key_file: env("ENCRYPTION_KEY_FILE"),
            google_client_id: env("GOOGLE_CLIENT_ID"),
            google_client_secret: env("GOOGLE_CLIENT_SECRET"),
            google_client_secret_file: env("GOOGLE_CLIENT_SECRET_FILE"),
            google_redirect_uri: env("GOOGLE_REDIRECT_URI"),
            token_storage_path: env("TOKEN_STORAGE_PATH").map(PathBuf::from),
            pending_storage_path: env("PENDING_STORAGE_PATH").map(PathBuf::from),
            session_lifetime_minutes,
        };

        raw.resolve()
    }

    /// Parses and validates a JSON settings document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_str(content)?;
        raw.resolve()
    }

    /// Reads a JSON settings file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&content)
    }

    /// Idle lifetime of a session.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_minutes.saturating_mul(60))
    }

    /// The storage encryptor. The key was validated when the settings were built.
    pub fn encryptor(&self) -> Result<Arc<TokenEncryptor>, ConfigError> {
        TokenEncryptor::from_base64_key(self.encryption_key.expose_secret())
            .map(Arc::new)
            .map_err(|source| ConfigError::Secret {
                name: "encryption_key".to_string(),
                source,
            })
    }

    /// Picks the OAuth app for a flow: a complete session override wins,
    /// otherwise the configured Google app. The redirect URI always comes
    /// from settings.
    pub fn oauth_app(&self, session_override: Option<(&str, &str)>) -> Option<OAuthApp> {
        let candidate = match session_override {
            Some((id, secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                OAuthApp::new(id, secret, self.google_redirect_uri.as_str())
            }
            _ => OAuthApp {
                client_id: self.google_client_id.clone().unwrap_or_default(),
                client_secret: self
                    .google_client_secret
                    .clone()
                    .unwrap_or_else(|| SecretString::from(String::new())),
                redirect_uri: self.google_redirect_uri.clone(),
            },
        };

        candidate.is_complete().then_some(candidate)
    }
}

impl RawSettings {
    fn resolve(self) -> Result<Settings, ConfigError> {
        let secret_key = resolve_secret(
            self.secret_key.as_deref(),
            self.secret_key_file.as_deref(),
            None,
        )
        .map_err(|source| ConfigError::Secret {
            name: "secret_key".to_string(),
            source,
        })?;

        let encryption_key = resolve_secret(
            self.encryption_key.as_deref(),
            self.encryption_key_file.as_deref(),
            None,
        )
        .map_err(|source| ConfigError::Secret {
            name: "encryption_key".to_string(),
            source,
        })?;

        let google_client_secret = resolve_secret_optional(
            self.google_client_secret.as_deref(),
            self.google_client_secret_file.as_deref(),
            None,
        )
        .map_err(|source| ConfigError::Secret {
            name: "google_client_secret".to_string(),
            source,
        })?;

        let settings = Settings {
            app_name: self
                .app_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            secret_key,
            encryption_key,
            google_client_id: self.google_client_id.filter(|id| !id.trim().is_empty()),
            google_client_secret: google_client_secret
                .filter(|s| !s.expose_secret().trim().is_empty()),
            google_redirect_uri: self
                .google_redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            token_storage_path: self
                .token_storage_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_STORAGE_PATH)),
            pending_storage_path: self
                .pending_storage_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PENDING_STORAGE_PATH)),
            session_lifetime_minutes: self
                .session_lifetime_minutes
                .unwrap_or(DEFAULT_SESSION_LIFETIME_MINUTES),
        };

        validate_settings(&settings)?;
        Ok(settings)
    }
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.secret_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "secret_key must not be empty".to_string(),
        });
    }

    // A bad key is fatal at startup, not at first use
    settings.encryptor()?;

    reqwest::Url::parse(&settings.google_redirect_uri).map_err(|e| ConfigError::Validation {
        message: format!(
            "Invalid google_redirect_uri '{}': {}",
            settings.google_redirect_uri, e
        ),
    })?;

    Ok(())
}

fn env(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.is_empty())
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("secret_key", &"[redacted]")
            .field("encryption_key", &"[redacted]")
            .field("google_client_id", &self.google_client_id)
            .field(
                "google_client_secret",
                &self.google_client_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("google_redirect_uri", &self.google_redirect_uri)
            .field("token_storage_path", &self.token_storage_path)
            .field("pending_storage_path", &self.pending_storage_path)
            .field("session_lifetime_minutes", &self.session_lifetime_minutes)
            .finish()
    }
}
