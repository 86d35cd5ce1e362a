use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use super::error::MailError;
use crate::oauth::flow::create_http_client;
use crate::storage::StoredCredential;

/// Gmail REST API base URL.
pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Base64 line length for the message body (RFC 2045).
const BODY_LINE_LENGTH: usize = 76;

/// Raw bytes per RFC 2047 encoded word, keeps each word under 75 characters.
const ENCODED_WORD_CHUNK: usize = 45;

const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Something that can deliver one plain-text message on behalf of a user.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Sends the message and returns the provider's message id.
    async fn send(
        &self,
        credential: &StoredCredential,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Sends through `users/me/messages/send` with the credential's bearer token.
pub struct GmailSender {
    client: Client,
    base_url: String,
}

impl GmailSender {
    pub fn new() -> Result<Self, MailError> {
        Self::with_base_url(GMAIL_API_BASE_URL)
    }

    /// Targets another API root, e.g. a local stand-in during tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MailError> {
        let client = create_http_client()
            .map_err(|e| MailError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/users/me/messages/send", self.base_url)
    }
}

#[async_trait]
impl MailSender for GmailSender {
    async fn send(
        &self,
        credential: &StoredCredential,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError> {
        let raw = build_raw_message(to, subject, body)?;

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&credential.access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            warn!("Mail API returned {}", status);
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| MailError::InvalidResponse(e.to_string()))?;

        debug!("Mail API accepted message {}", sent.id);
        Ok(sent.id)
    }
}

/// Builds a `text/plain; charset=utf-8` RFC 2822 message and returns it
/// base64url encoded, ready for the `raw` field of a send request.
pub fn build_raw_message(to: &str, subject: &str, body: &str) -> Result<String, MailError> {
    if to.contains(['\r', '\n']) {
        return Err(MailError::InvalidHeader { header: "To" });
    }
    if subject.contains(['\r', '\n']) {
        return Err(MailError::InvalidHeader { header: "Subject" });
    }

    let mut message = String::new();
    message.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Transfer-Encoding: base64\r\n");
    message.push_str(&format!("To: {}\r\n", to));
    message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    message.push_str("\r\n");

    let encoded_body = STANDARD.encode(body.as_bytes());
    for line in encoded_body.as_bytes().chunks(BODY_LINE_LENGTH) {
        // Base64 output is ASCII
        message.push_str(&String::from_utf8_lossy(line));
        message.push_str("\r\n");
    }

    Ok(URL_SAFE.encode(message.as_bytes()))
}

/// RFC 2047 `B` encoding for non-ASCII header values, split on char boundaries.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in value.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> String {
        String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap()
    }

    fn decoded_body(message: &str) -> String {
        let (_, body) = message.split_once("\r\n\r\n").unwrap();
        let joined: String = body.split("\r\n").collect();
        String::from_utf8(STANDARD.decode(joined).unwrap()).unwrap()
    }

    #[test]
    fn test_build_raw_message_headers_and_body() {
        let raw = build_raw_message("ada@example.com", "Hello Ada", "Dear Dr. Lovelace,\nWelcome!")
            .unwrap();
        let message = decode(&raw);

        assert!(message.contains("To: ada@example.com\r\n"));
        assert!(message.contains("Subject: Hello Ada\r\n"));
        assert!(message.contains("Content-Type: text/plain; charset=\"utf-8\""));
        assert_eq!(decoded_body(&message), "Dear Dr. Lovelace,\nWelcome!");
    }

    #[test]
    fn test_raw_message_is_url_safe() {
        let raw = build_raw_message("a@example.com", "s", &"?>~".repeat(200)).unwrap();
        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let raw = build_raw_message("a@example.com", "Grüße, Ada", "body").unwrap();
        let message = decode(&raw);
        assert!(message.contains("Subject: =?utf-8?b?"));
        assert!(!message.contains("Grüße"));
    }

    #[test]
    fn test_long_non_ascii_subject_splits_on_char_boundaries() {
        let subject = "ü".repeat(60);
        let encoded = encode_header(&subject);
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);

        let rebuilt: String = words
            .iter()
            .map(|w| {
                let inner = w.trim_start_matches("=?utf-8?b?").trim_end_matches("?=");
                String::from_utf8(STANDARD.decode(inner).unwrap()).unwrap()
            })
            .collect();
        assert_eq!(rebuilt, subject);
    }

    #[test]
    fn test_header_injection_rejected() {
        assert_eq!(
            build_raw_message("a@example.com\r\nBcc: x@example.com", "s", "b"),
            Err(MailError::InvalidHeader { header: "To" })
        );
        assert_eq!(
            build_raw_message("a@example.com", "s\nBcc: x@example.com", "b"),
            Err(MailError::InvalidHeader { header: "Subject" })
        );
    }

    #[test]
    fn test_send_url() {
        let sender = GmailSender::with_base_url("http://127.0.0.1:9/gmail/v1/").unwrap();
        assert_eq!(sender.send_url(), "http://127.0.0.1:9/gmail/v1/users/me/messages/send");
        assert_eq!(
            GmailSender::new().unwrap().send_url(),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/send"
        );
    }
}
