use chrono::Utc;
use log::{info, warn};

use super::sender::MailSender;
use crate::session::{DeliveryStatus, RenderedMessage};
use crate::storage::StoredCredential;

/// Outcome counts of one [`send_batch`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Sends every approved message, one at a time, in order.
///
/// A failed send is recorded on its message and never stops the rest.
/// Unapproved messages are marked skipped.
#[tracing::instrument(name = "mail.send_batch", skip_all, fields(messages = messages.len()))]
pub async fn send_batch(
    sender: &dyn MailSender,
    credential: &StoredCredential,
    messages: &mut [RenderedMessage],
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for message in messages.iter_mut() {
        if !message.approved {
            message.mark_skipped();
            summary.skipped += 1;
            continue;
        }

        match sender
            .send(
                credential,
                &message.recipient.email,
                &message.subject,
                &message.body,
            )
            .await
        {
            Ok(_) => {
                message.mark_sent(Utc::now());
                summary.sent += 1;
            }
            Err(e) => {
                warn!("Failed to send to {}: {}", message.recipient.email, e);
                message.mark_failed(e.to_string());
                summary.failed += 1;
            }
        }
    }

    info!(
        "Dispatch finished: {} sent, {} failed, {} skipped",
        summary.sent, summary.failed, summary.skipped
    );
    summary
}

impl DispatchSummary {
    /// Summarizes the statuses already recorded on `messages`.
    pub fn from_messages(messages: &[RenderedMessage]) -> Self {
        let mut summary = Self::default();
        for message in messages {
            match message.status {
                DeliveryStatus::Sent => summary.sent += 1,
                DeliveryStatus::Failed => summary.failed += 1,
                DeliveryStatus::Skipped => summary.skipped += 1,
                DeliveryStatus::Pending => {}
            }
        }
        summary
    }
}
