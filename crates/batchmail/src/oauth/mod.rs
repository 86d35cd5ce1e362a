//! OAuth2 authorization-code flow for the Gmail send scope.

pub mod error;
pub mod flow;
pub mod provider;

pub use error::OAuthError;
pub use flow::{CallbackParams, OAuthFlow, TokenResponse};
pub use provider::{OAuthApp, OAuthProvider, GMAIL_SEND_SCOPE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
