//! Outgoing mail: message encoding, the Gmail sender and batch dispatch.

pub mod dispatch;
pub mod error;
pub mod sender;

pub use dispatch::{send_batch, DispatchSummary};
pub use error::MailError;
pub use sender::{build_raw_message, GmailSender, MailSender};
