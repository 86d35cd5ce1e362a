pub mod config;
pub mod error;
pub mod mail;
pub mod oauth;
pub mod processor;
pub mod recipients;
pub mod secrets;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod template;
pub mod workflow;

pub use config::Settings;
pub use error::{BatchError, ConfigError, ProcessError, Result, StorageError};
pub use mail::{send_batch, DispatchSummary, GmailSender, MailError, MailSender};
pub use oauth::{CallbackParams, OAuthApp, OAuthError, OAuthFlow, OAuthProvider};
pub use recipients::{parse_recipients, CsvError, ParsedRecipients};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, TokenEncryptor};
pub use session::{
    DeliveryStatus, PurgePolicy, Recipient, RenderedMessage, SessionState, SessionStore, Template,
};
pub use storage::{EncryptedKvStore, PendingCredentialStore, StoredCredential, TokenStore};
pub use telemetry::{init_logging, LogFormat};
pub use template::{render_batch, render_message, rerender_subjects, TemplateError};
pub use workflow::{BatchWorkflow, TemplateUpload, WorkflowError};
