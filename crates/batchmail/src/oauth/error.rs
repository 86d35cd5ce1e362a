//! OAuth flow error types.

use thiserror::Error;

use crate::error::StorageError;

/// Errors from the authorization-code flow.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// No OAuth app (client id + secret) is available for this session.
    #[error("OAuth client ID and secret are required before connecting")]
    MissingClientCredentials,

    /// The callback's `state` does not belong to the calling session.
    #[error("Invalid session state")]
    StateMismatch,

    /// The provider redirected back with an `error` parameter.
    #[error("Authorization was not granted: {0}")]
    ProviderDenied(String),

    /// The callback carried neither an error nor a code.
    #[error("Missing authorization code")]
    MissingCode,

    /// The token endpoint could not be reached.
    #[error("Token request failed: {0}")]
    Http(String),

    /// The token endpoint answered with a non-success status.
    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    /// The token endpoint answered with something we cannot use.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// An endpoint or redirect URL is malformed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The credential could not be persisted.
    #[error("Failed to persist credential: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for OAuth operations.
pub type Result<T> = std::result::Result<T, OAuthError>;
