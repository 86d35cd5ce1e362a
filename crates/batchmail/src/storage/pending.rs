//! OAuth app credentials parked under the OAuth `state` value.
//!
//! The authorization redirect can outlive the in-memory session entry (the
//! user may sit on the consent screen past the session TTL). Parking the
//! client id/secret under the `state` lets the callback finish the exchange
//! with the same OAuth app that started it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::encrypted::EncryptedKvStore;
use crate::error::StorageError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for PendingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

/// Encrypted, file-backed map of OAuth state -> [`PendingCredentials`].
#[derive(Clone)]
pub struct PendingCredentialStore {
    store: EncryptedKvStore,
}

impl PendingCredentialStore {
    pub fn new(store: EncryptedKvStore) -> Self {
        Self { store }
    }

    pub fn set(&self, state: &str, client_id: &str, client_secret: &str) -> Result<(), StorageError> {
        let record = serde_json::to_value(PendingCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })?;
        self.store.update(|map| {
            map.insert(state.to_string(), record);
        })
    }

    /// Returns the record without removing it.
    pub fn peek(&self, state: &str) -> Option<PendingCredentials> {
        self.store
            .read(|map| map.get(state).cloned())
            .and_then(decode)
    }

    /// Removes and returns the record.
    pub fn pop(&self, state: &str) -> Result<Option<PendingCredentials>, StorageError> {
        let removed = self.store.update(|map| map.remove(state))?;
        Ok(removed.and_then(decode))
    }
}

fn decode(value: Value) -> Option<PendingCredentials> {
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::TokenEncryptor;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pending_store(dir: &TempDir) -> PendingCredentialStore {
        let encryptor = Arc::new(
            TokenEncryptor::from_base64_key("MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA=")
                .unwrap(),
        );
        PendingCredentialStore::new(
            EncryptedKvStore::open(dir.path().join("pending.json"), encryptor).unwrap(),
        )
    }

    #[test]
    fn test_set_peek_pop() {
        let dir = TempDir::new().unwrap();
        let store = pending_store(&dir);
        store.set("state-1", "id", "secret").unwrap();

        let peeked = store.peek("state-1").unwrap();
        assert_eq!(peeked.client_id, "id");
        assert_eq!(peeked.client_secret, "secret");

        let popped = store.pop("state-1").unwrap().unwrap();
        assert_eq!(popped, peeked);
        assert!(store.peek("state-1").is_none());
        assert!(store.pop("state-1").unwrap().is_none());
    }
}
