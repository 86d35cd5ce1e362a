//! Secret resolution and at-rest encryption.
//!
//! Secrets such as OAuth client secrets and the storage key can be supplied in
//! three ways, checked in priority order:
//!
//! 1. **Direct value** - handy for local runs (`BATCH_APP_GOOGLE_CLIENT_SECRET=...`)
//! 2. **File reference** - Docker secrets pattern (`BATCH_APP_GOOGLE_CLIENT_SECRET_FILE=/run/secrets/x`)
//! 3. **Env var reference** - indirection to another variable name
//!
//! [`TokenEncryptor`] wraps AES-256-GCM and is what the encrypted stores use.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution and encryption failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from multiple sources in priority order:
/// 1. Direct value (if provided and non-empty)
/// 2. File contents (if path provided)
/// 3. Environment variable (if name provided)
///
/// # Examples
///
/// ```ignore
/// use batchmail::secrets::resolve_secret;
///
/// let secret = resolve_secret(None, Some("/run/secrets/client_secret"), Some("CLIENT_SECRET"))?;
/// ```
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                // Env vars may carry trailing newlines
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves a secret, returning None if no source is provided instead of an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands `~` to the user's home directory.
///
/// Only `~` and `~/path` are supported, not `~user/path`.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// Storage Encryption
// ============================================

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Required key size for AES-256 (32 bytes).
const KEY_SIZE: usize = 32;

/// Symmetric encryptor for the on-disk stores, using AES-256-GCM.
///
/// The key is 32 raw bytes supplied base64-encoded. Both the standard and the
/// URL-safe alphabet are accepted, so Fernet-style keys keep working.
pub struct TokenEncryptor {
    cipher: Aes256Gcm,
}

impl TokenEncryptor {
    /// Creates a new encryptor from a base64-encoded 32 byte key.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidKey`] if the value is not base64 or does
    /// not decode to exactly 32 bytes. Callers treat this as fatal.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_b64 = key_b64.trim();
        let key_bytes = STANDARD
            .decode(key_b64)
            .or_else(|_| URL_SAFE.decode(key_b64))
            .or_else(|_| URL_SAFE_NO_PAD.decode(key_b64))
            .map_err(|e| SecretError::InvalidKey(format!("Invalid base64 key: {}", e)))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(SecretError::InvalidKey(format!(
                "Key must be {} bytes, got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` and returns base64 of `<12-byte nonce><ciphertext>`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(STANDARD.encode(combined))
    }

    /// Decrypts the output of [`TokenEncryptor::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let combined = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretError::DecryptionError(format!("Invalid base64: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))
    }
}

/// Returns a URL-safe random token carrying `N` bytes of entropy.
///
/// Used for session identifiers handed to the web layer.
pub fn random_token<const N: usize>() -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(rand_bytes::<N>()?))
}

/// Generates random bytes from the OS generator.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
