//! Workflow data held per session.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_TITLE_LEN: usize = 40;
const MAX_NAME_LEN: usize = 120;
const MAX_EMAIL_LEN: usize = 254;

/// Pragmatic address check: one `@`, no whitespace, dotted domain with
/// alphanumeric labels.
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("email pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecipientError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
}

/// A single recipient from the uploaded list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Recipient {
    /// Builds a recipient from raw field values, trimming and validating each.
    pub fn new(
        title: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<Self, RecipientError> {
        let title = required("title", title, MAX_TITLE_LEN)?;
        let first_name = required("first_name", first_name, MAX_NAME_LEN)?;
        let last_name = required("last_name", last_name, MAX_NAME_LEN)?;
        let email = required("email", email, MAX_EMAIL_LEN)?;

        if !EMAIL_PATTERN.is_match(&email) {
            return Err(RecipientError::InvalidEmail(email));
        }

        Ok(Self {
            title,
            first_name,
            last_name,
            email,
        })
    }

    /// "Title First Last", e.g. `Dr. Ada Lovelace`.
    pub fn display_name(&self) -> String {
        format!(
            "{} {} {}",
            self.title.trim(),
            self.first_name.trim(),
            self.last_name.trim()
        )
        .trim()
        .to_string()
    }
}

fn required(field: &'static str, value: &str, max: usize) -> Result<String, RecipientError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RecipientError::Missing { field });
    }
    if value.chars().count() > max {
        return Err(RecipientError::TooLong { field, max });
    }
    Ok(value.to_string())
}

/// Subject and body patterns supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub source_filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A personalized message ready for preview and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
    pub approved: bool,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RenderedMessage {
    pub fn new(recipient: Recipient, subject: String, body: String) -> Self {
        Self {
            recipient,
            subject,
            body,
            approved: true,
            status: DeliveryStatus::Pending,
            error: None,
            sent_at: None,
        }
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.status = DeliveryStatus::Sent;
        self.error = None;
        self.sent_at = Some(at);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn mark_skipped(&mut self) {
        self.status = DeliveryStatus::Skipped;
    }

    /// Flips approval. Withdrawing approval from a sent message puts it back
    /// to pending so the preview no longer reports it as delivered.
    pub fn toggle_approval(&mut self) {
        self.approved = !self.approved;
        if !self.approved && self.status == DeliveryStatus::Sent {
            self.status = DeliveryStatus::Pending;
            self.error = None;
            self.sent_at = None;
        }
    }
}

/// All in-memory data for one user's workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub recipients: Vec<Recipient>,
    pub template: Option<Template>,
    pub messages: Vec<RenderedMessage>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_authorized: bool,
}

impl SessionState {
    /// Installs a new recipient list. Template and messages were derived from
    /// the old list, so both are dropped.
    pub fn replace_recipients(&mut self, recipients: Vec<Recipient>) {
        self.recipients = recipients;
        self.template = None;
        self.messages.clear();
    }

    /// Installs a template together with the messages rendered from it.
    pub fn set_rendered(&mut self, template: Template, messages: Vec<RenderedMessage>) {
        self.template = Some(template);
        self.messages = messages;
    }

    /// Stores per-session OAuth app credentials. Any earlier authorization
    /// belonged to the previous app and no longer counts.
    pub fn set_oauth_app(&mut self, client_id: String, client_secret: String) {
        self.oauth_client_id = Some(client_id);
        self.oauth_client_secret = Some(client_secret);
        self.oauth_authorized = false;
    }

    /// True when both OAuth app fields are present and non-empty.
    pub fn has_oauth_app(&self) -> bool {
        self.oauth_client_id.as_deref().is_some_and(|s| !s.is_empty())
            && self
                .oauth_client_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty())
    }

    /// Approval flags keyed by recipient email.
    pub fn approvals(&self) -> HashMap<String, bool> {
        self.messages
            .iter()
            .map(|m| (m.recipient.email.clone(), m.approved))
            .collect()
    }
}
