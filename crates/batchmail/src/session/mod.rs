//! Per-session workflow state.
//!
//! Nothing here is persisted: a session lives in memory until it is reset or
//! sits idle past the configured lifetime.

pub mod model;
pub mod store;

pub use model::{
    DeliveryStatus, Recipient, RecipientError, RenderedMessage, SessionState, Template,
};
pub use store::{lock_session, PurgePolicy, SessionStore, SharedSession, DEFAULT_SESSION_TTL};
