//! OAuth credential persistence, one record per session id.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::encrypted::EncryptedKvStore;
use crate::error::StorageError;

/// Largest expiry buffer we accept (1 year), keeps the chrono arithmetic in range.
const MAX_BUFFER_SECONDS: u64 = 365 * 24 * 60 * 60;

/// An OAuth credential as persisted in the token store.
///
/// Carries the client id/secret of the OAuth app that issued it, so a refresh
/// goes to the same app even if the session later switched apps.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredCredential {
    /// Checks if the access token is expired (or expires within `buffer_seconds`).
    ///
    /// A credential without an expiry never expires.
    pub fn is_expired(&self, buffer_seconds: u64) -> bool {
        let Some(expiry) = self.expiry else {
            return false;
        };
        let buffer = chrono::Duration::seconds(buffer_seconds.min(MAX_BUFFER_SECONDS) as i64);
        expiry <= Utc::now() + buffer
    }

    /// Checks if the credential can be refreshed.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Encrypted, file-backed map of session id -> [`StoredCredential`].
///
/// Each value is stored as a JSON string inside the encrypted map.
#[derive(Clone)]
pub struct TokenStore {
    store: EncryptedKvStore,
}

impl TokenStore {
    pub fn new(store: EncryptedKvStore) -> Self {
        Self { store }
    }

    /// Stores `credential` under `session_id`, replacing any previous record.
    pub fn save_credentials(
        &self,
        session_id: &str,
        credential: &StoredCredential,
    ) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(credential)?;
        self.store.update(|map| {
            map.insert(session_id.to_string(), serde_json::Value::String(encoded));
        })
    }

    /// Loads the credential for `session_id`.
    ///
    /// Records that no longer deserialize are treated as absent.
    pub fn load_credentials(&self, session_id: &str) -> Option<StoredCredential> {
        let value = self.store.read(|map| map.get(session_id).cloned())?;

        // Older files may hold the object inline rather than as a string
        let parsed = match value {
            serde_json::Value::String(encoded) => serde_json::from_str(&encoded),
            other => serde_json::from_value(other),
        };

        match parsed {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Ignoring unreadable credential record: {}", e);
                None
            }
        }
    }

    /// Removes the credential for `session_id`. No-op when absent.
    pub fn clear(&self, session_id: &str) -> Result<(), StorageError> {
        self.store.update(|map| {
            map.remove(session_id);
        })
    }
}
