//! Encrypted JSON map persisted to a single file.
//!
//! The whole map is re-read and rewritten on every mutation. That is fine for
//! the handful of entries a session-scoped tool keeps, and it keeps the file
//! format trivial: base64 of `<nonce><AES-256-GCM ciphertext of the JSON>`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use serde_json::Value;

use crate::error::StorageError;
use crate::secrets::TokenEncryptor;

/// Decrypted contents of an [`EncryptedKvStore`].
pub type KvMap = BTreeMap<String, Value>;

/// File-backed map encrypted with a process-wide key.
///
/// Cloning is cheap and clones share the same lock. All access goes through
/// one `Mutex`, held for the full load -> mutate -> save sequence so
/// concurrent updates cannot lose each other's writes.
#[derive(Clone)]
pub struct EncryptedKvStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    encryptor: Arc<TokenEncryptor>,
    lock: Mutex<()>,
}

impl EncryptedKvStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// The file itself is created on the first save.
    pub fn open(path: impl Into<PathBuf>, encryptor: Arc<TokenEncryptor>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                encryptor,
                lock: Mutex::new(()),
            }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the last saved map, or an empty one when the file is absent,
    /// empty, or unreadable.
    pub fn load(&self) -> KvMap {
        let _guard = self.lock();
        self.load_unlocked()
    }

    /// Replaces the stored map.
    pub fn save(&self, map: &KvMap) -> Result<(), StorageError> {
        let _guard = self.lock();
        self.save_unlocked(map)
    }

    /// Runs `f` over the current map and persists the result, all under the lock.
    pub fn update<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut KvMap) -> T,
    {
        let _guard = self.lock();
        let mut map = self.load_unlocked();
        let out = f(&mut map);
        self.save_unlocked(&map)?;
        Ok(out)
    }

    /// Runs `f` over the current map under the lock without writing back.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&KvMap) -> T,
    {
        let _guard = self.lock();
        let map = self.load_unlocked();
        f(&map)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_unlocked(&self) -> KvMap {
        let path = &self.inner.path;
        let encoded = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return KvMap::new(),
            Err(e) => {
                warn!("Failed to read store {}: {}", path.display(), e);
                return KvMap::new();
            }
        };

        if encoded.trim().is_empty() {
            return KvMap::new();
        }

        let plaintext = match self.inner.encryptor.decrypt(&encoded) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Discarding unreadable store {}: {}", path.display(), e);
                return KvMap::new();
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(map) => map,
            Err(e) => {
                warn!("Discarding malformed store {}: {}", path.display(), e);
                KvMap::new()
            }
        }
    }

    fn save_unlocked(&self, map: &KvMap) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(map)?;
        let encoded = self
            .inner
            .encryptor
            .encrypt(&payload)
            .map_err(StorageError::Encryption)?;

        write_atomic(&self.inner.path, encoded.as_bytes())?;
        debug!(
            "Saved {} entries to {}",
            map.len(),
            self.inner.path.display()
        );
        Ok(())
    }
}

/// Writes `content` to a sibling temp file, syncs it, then renames it over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let write_err = |source| StorageError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp_path).map_err(write_err)?;
    file.write_all(content).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const TEST_KEY: &str = "MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA=";

    fn store_in(dir: &TempDir) -> EncryptedKvStore {
        let encryptor = Arc::new(TokenEncryptor::from_base64_key(TEST_KEY).unwrap());
        EncryptedKvStore::open(dir.path().join("nested").join("store.json"), encryptor).unwrap()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load().is_empty());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut map = KvMap::new();
        map.insert("alpha".to_string(), json!("one"));
        map.insert("beta".to_string(), json!({"n": 2}));
        store.save(&map).unwrap();

        assert_eq!(store.load(), map);

        // Nothing readable in plaintext on disk
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("alpha"));
    }

    #[test]
    fn test_update_is_read_modify_write() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .update(|map| map.insert("a".to_string(), json!(1)))
            .unwrap();
        let previous = store
            .update(|map| map.insert("a".to_string(), json!(2)))
            .unwrap();

        assert_eq!(previous, Some(json!(1)));
        assert_eq!(store.read(|map| map.get("a").cloned()), Some(json!(2)));
    }

    #[test]
    fn test_corrupt_and_empty_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        fs::write(store.path(), "").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.path(), "definitely not ciphertext").unwrap();
        assert!(store.load().is_empty());

        // Valid ciphertext under a different key
        let other = TokenEncryptor::from_base64_key(
            "MTExMTExMTExMTExMTExMTExMTExMTExMTExMTExMTE=",
        )
        .unwrap();
        fs::write(store.path(), other.encrypt(b"{\"a\":1}").unwrap()).unwrap();
        assert!(store.load().is_empty());

        // Store recovers on the next save
        store
            .update(|map| map.insert("k".to_string(), json!("v")))
            .unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_concurrent_updates_do_not_lose_writes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update(|map| map.insert(format!("key-{}", i), json!(i)))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load().len(), 8);
    }
}
