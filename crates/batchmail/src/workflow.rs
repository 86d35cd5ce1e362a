//! The user-facing steps of a batch, one method per web request.
//!
//! [`BatchWorkflow`] owns the session store, both encrypted stores and the
//! OAuth flow. Session locks are only held for synchronous work; every
//! network call runs on a snapshot and writes its outcome back afterwards.

use std::collections::HashMap;

use log::{info, warn};
use reqwest::Url;
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::Settings;
use crate::error::{ConfigError, ProcessError, StorageError};
use crate::mail::{send_batch, DispatchSummary, MailSender};
use crate::oauth::{CallbackParams, OAuthApp, OAuthError, OAuthFlow, OAuthProvider};
use crate::processor::extract_template_body;
use crate::recipients::{parse_recipients, CsvError};
use crate::secrets::random_token;
use crate::session::{lock_session, RenderedMessage, SessionState, SessionStore, Template};
use crate::storage::{
    EncryptedKvStore, PendingCredentialStore, PendingCredentials, StoredCredential, TokenStore,
};
use crate::template::{render_batch, rerender_subjects, TemplateError};

/// Form field prefix for edited bodies (`body_0`, `body_1`, ...).
pub const BODY_FIELD_PREFIX: &str = "body_";

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Client ID and client secret are both required")]
    IncompleteOAuthApp,

    #[error("Please add your Google OAuth client ID and secret before connecting")]
    NeedsOAuthApp,

    #[error("Gmail authorization is required before sending")]
    NeedsAuthorization,

    #[error("Upload a recipient list first")]
    NoRecipients,

    #[error("The recipient list has invalid rows: {}", .0.join("; "))]
    InvalidRows(Vec<String>),

    #[error("No valid rows found in the CSV")]
    EmptyRecipientList,

    #[error("Please provide an email subject")]
    MissingSubject,

    #[error("Please provide the email body")]
    MissingBody,

    #[error("Message {0} not found")]
    MessageNotFound(usize),

    #[error("No rendered messages; submit a template first")]
    NothingToSend,

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// An uploaded template file. `.docx` files are converted, anything else
/// must be UTF-8 text.
#[derive(Debug, Clone, Copy)]
pub struct TemplateUpload<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
}

pub struct BatchWorkflow {
    settings: Settings,
    sessions: SessionStore,
    tokens: TokenStore,
    pending: PendingCredentialStore,
    oauth: OAuthFlow,
}

impl BatchWorkflow {
    pub fn new(
        settings: Settings,
        sessions: SessionStore,
        tokens: TokenStore,
        pending: PendingCredentialStore,
        oauth: OAuthFlow,
    ) -> Self {
        Self {
            settings,
            sessions,
            tokens,
            pending,
            oauth,
        }
    }

    /// Wires everything from settings against Google's endpoints.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Self::with_provider(settings, OAuthProvider::google())
    }

    /// Like [`BatchWorkflow::from_settings`] with another authorization server.
    pub fn with_provider(settings: Settings, provider: OAuthProvider) -> Result<Self> {
        let encryptor = settings.encryptor()?;
        let tokens = TokenStore::new(EncryptedKvStore::open(
            &settings.token_storage_path,
            encryptor.clone(),
        )?);
        let pending = PendingCredentialStore::new(EncryptedKvStore::open(
            &settings.pending_storage_path,
            encryptor,
        )?);
        let sessions = SessionStore::new(settings.session_ttl());
        let oauth = OAuthFlow::new(provider, tokens.clone())?;

        info!(
            "{} ready (session lifetime {} minutes)",
            settings.app_name, settings.session_lifetime_minutes
        );
        Ok(Self::new(settings, sessions, tokens, pending, oauth))
    }

    /// A fresh random session id (16 random bytes, URL-safe base64).
    pub fn new_session_id() -> crate::secrets::Result<String> {
        random_token::<16>()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Copy of the session's current state, for rendering views.
    pub fn snapshot(&self, session_id: &str) -> SessionState {
        lock_session(&self.sessions.get(session_id)).clone()
    }

    /// Stores the user's own OAuth app for this session.
    ///
    /// Any credential obtained under the previous app is discarded.
    pub fn save_oauth_app(&self, session_id: &str, client_id: &str, client_secret: &str) -> Result<()> {
        let client_id = client_id.trim();
        let client_secret = client_secret.trim();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(WorkflowError::IncompleteOAuthApp);
        }

        lock_session(&self.sessions.get(session_id))
            .set_oauth_app(client_id.to_string(), client_secret.to_string());
        self.tokens.clear(session_id)?;
        Ok(())
    }

    /// Replaces the session's recipients with a parsed CSV upload.
    ///
    /// The upload is rejected as a whole if any row is invalid.
    pub fn upload_recipients(&self, session_id: &str, csv: &[u8]) -> Result<usize> {
        let parsed = parse_recipients(csv)?;
        if !parsed.errors.is_empty() {
            return Err(WorkflowError::InvalidRows(parsed.errors));
        }
        if parsed.recipients.is_empty() {
            return Err(WorkflowError::EmptyRecipientList);
        }

        let count = parsed.recipients.len();
        lock_session(&self.sessions.get(session_id)).replace_recipients(parsed.recipients);
        info!("Loaded {} recipients", count);
        Ok(count)
    }

    /// Installs a template and renders one message per recipient.
    ///
    /// A file upload with a name replaces the typed body. Returns the number
    /// of rendered messages.
    pub fn submit_template(
        &self,
        session_id: &str,
        subject: &str,
        body: &str,
        upload: Option<TemplateUpload<'_>>,
    ) -> Result<usize> {
        let session = self.sessions.get(session_id);
        let mut state = lock_session(&session);
        if state.recipients.is_empty() {
            return Err(WorkflowError::NoRecipients);
        }

        let subject = subject.trim();
        let mut body = body.trim().to_string();
        let mut source_filename = None;

        if let Some(upload) = upload.filter(|u| !u.filename.is_empty()) {
            body = extract_template_body(upload.filename, upload.bytes)?;
            source_filename = Some(upload.filename.to_string());
        }

        if subject.is_empty() {
            return Err(WorkflowError::MissingSubject);
        }
        if body.trim().is_empty() {
            return Err(WorkflowError::MissingBody);
        }

        let template = Template {
            subject: subject.to_string(),
            body,
            source_filename,
        };
        let messages = render_batch(&template, &state.recipients)?;
        let count = messages.len();
        state.set_rendered(template, messages);
        Ok(count)
    }

    /// Flips approval of one message and returns the new flag.
    pub fn toggle_approval(&self, session_id: &str, index: usize) -> Result<bool> {
        let session = self.sessions.get(session_id);
        let mut state = lock_session(&session);
        let message = state
            .messages
            .get_mut(index)
            .ok_or(WorkflowError::MessageNotFound(index))?;
        message.toggle_approval();
        Ok(message.approved)
    }

    /// Applies edited bodies (by message index) and re-renders every subject.
    ///
    /// Indices without a message are ignored.
    pub fn update_bodies(&self, session_id: &str, bodies: &HashMap<usize, String>) -> Result<()> {
        let session = self.sessions.get(session_id);
        let mut state = lock_session(&session);
        let Some(template) = state.template.clone() else {
            return Err(WorkflowError::NothingToSend);
        };
        if state.messages.is_empty() {
            return Err(WorkflowError::NothingToSend);
        }

        for (index, message) in state.messages.iter_mut().enumerate() {
            if let Some(body) = bodies.get(&index) {
                message.body = body.clone();
            }
        }

        rerender_subjects(&template, &mut state.messages)?;
        Ok(())
    }

    /// Starts the OAuth flow and returns the consent URL to redirect to.
    ///
    /// The OAuth app is parked under the `state` so the callback still finds
    /// it if the session expires meanwhile.
    pub fn authorization_url(&self, session_id: &str) -> Result<Url> {
        let app = {
            let session = self.sessions.get(session_id);
            let state = lock_session(&session);
            self.resolve_app(&state)
        }
        .ok_or(WorkflowError::NeedsOAuthApp)?;

        let url = self.oauth.build_authorization_url(session_id, &app)?;
        self.pending
            .set(session_id, &app.client_id, app.client_secret.expose_secret())?;
        Ok(url)
    }

    /// Completes the OAuth flow from the provider's redirect.
    #[tracing::instrument(name = "workflow.handle_callback", skip_all)]
    pub async fn handle_callback(
        &self,
        session_id: &str,
        params: &CallbackParams,
    ) -> Result<StoredCredential> {
        let code = match OAuthFlow::verify_callback(session_id, params) {
            Ok(code) => code,
            Err(OAuthError::StateMismatch) => return Err(OAuthError::StateMismatch.into()),
            Err(e) => {
                // Flow is over for this state; nothing to finish later
                if let Err(cleanup) = self.pending.pop(session_id) {
                    warn!("Failed to discard pending OAuth app: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        // The parked app started this flow, so the code belongs to it
        let (app, recovered) = {
            let session = self.sessions.get(session_id);
            let state = lock_session(&session);
            match self.pending.peek(session_id) {
                Some(parked) => {
                    let global_id = self.settings.google_client_id.as_deref();
                    let restore =
                        !state.has_oauth_app() && global_id != Some(parked.client_id.as_str());
                    (self.parked_app(&parked), restore.then_some(parked))
                }
                None => (
                    self.resolve_app(&state).ok_or(WorkflowError::NeedsOAuthApp)?,
                    None,
                ),
            }
        };

        let credential = self.oauth.exchange_code(session_id, &code, &app).await?;
        if let Err(e) = self.pending.pop(session_id) {
            warn!("Failed to discard pending OAuth app: {}", e);
        }

        let session = self.sessions.get(session_id);
        let mut state = lock_session(&session);
        if let Some(parked) = recovered {
            info!("Restored OAuth app for an expired session");
            state.set_oauth_app(parked.client_id, parked.client_secret);
        }
        state.oauth_authorized = true;

        Ok(credential)
    }

    /// Sends every approved message of the session.
    ///
    /// Per-message outcomes are recorded on the messages; the summary counts
    /// them.
    #[tracing::instrument(name = "workflow.send_approved", skip_all)]
    pub async fn send_approved(
        &self,
        session_id: &str,
        sender: &dyn MailSender,
    ) -> Result<DispatchSummary> {
        let mut messages = {
            let session = self.sessions.get(session_id);
            let state = lock_session(&session);
            let template = match &state.template {
                Some(template) if !state.messages.is_empty() => template,
                _ => return Err(WorkflowError::NothingToSend),
            };
            if template.subject.trim().is_empty() {
                return Err(WorkflowError::MissingSubject);
            }
            state.messages.clone()
        };

        let credential = self
            .oauth
            .get_credentials(session_id)
            .await?
            .ok_or(WorkflowError::NeedsAuthorization)?;

        let summary = send_batch(sender, &credential, &mut messages).await;

        let session = self.sessions.get(session_id);
        let mut state = lock_session(&session);
        if same_recipients(&state.messages, &messages) {
            // Only delivery fields; edits made during the send stay
            for (current, sent) in state.messages.iter_mut().zip(messages) {
                current.status = sent.status;
                current.error = sent.error;
                current.sent_at = sent.sent_at;
            }
        } else {
            warn!("Recipient list changed during dispatch; delivery results not recorded");
        }

        Ok(summary)
    }

    /// Forgets everything about the session, stored credential included.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        self.sessions.clear(session_id);
        self.tokens.clear(session_id)?;
        self.pending.pop(session_id)?;
        Ok(())
    }

    fn resolve_app(&self, state: &SessionState) -> Option<OAuthApp> {
        let session_override = match (&state.oauth_client_id, &state.oauth_client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        };
        self.settings.oauth_app(session_override)
    }

    fn parked_app(&self, parked: &PendingCredentials) -> OAuthApp {
        OAuthApp::new(
            parked.client_id.as_str(),
            parked.client_secret.as_str(),
            self.settings.google_redirect_uri.as_str(),
        )
    }
}

/// Collects `body_{index}` form fields into edited bodies by index.
pub fn bodies_from_form<'a, I>(fields: I) -> HashMap<usize, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    fields
        .into_iter()
        .filter_map(|(name, value)| {
            let index = name.strip_prefix(BODY_FIELD_PREFIX)?.parse().ok()?;
            Some((index, value.to_string()))
        })
        .collect()
}

fn same_recipients(current: &[RenderedMessage], sent: &[RenderedMessage]) -> bool {
    current.len() == sent.len()
        && current
            .iter()
            .zip(sent)
            .all(|(a, b)| a.recipient == b.recipient)
}
