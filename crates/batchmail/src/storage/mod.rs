pub mod encrypted;
pub mod pending;
pub mod token_store;

pub use encrypted::{EncryptedKvStore, KvMap};
pub use pending::{PendingCredentialStore, PendingCredentials};
pub use token_store::{StoredCredential, TokenStore};
