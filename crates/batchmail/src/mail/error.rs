//! Mail dispatch error types.

use thiserror::Error;

/// Errors from building or sending one message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// A header value would break the message framing (embedded CR/LF).
    #[error("Invalid {header} header: line breaks are not allowed")]
    InvalidHeader { header: &'static str },

    /// The mail API could not be reached.
    #[error("Send request failed: {0}")]
    Http(String),

    /// The mail API answered with a non-success status.
    #[error("Mail API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The mail API answered with something we cannot use.
    #[error("Invalid mail API response: {0}")]
    InvalidResponse(String),
}
