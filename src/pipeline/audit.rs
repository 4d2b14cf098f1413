//! Audit trail of moderation outcomes, emitted on the `audit` tracing target.

use tracing::info;

use crate::channels::ChatMessage;

/// Content as it appears in audit records.
pub fn display_content(message: &ChatMessage) -> &str {
    if message.content.is_empty() {
        "<empty message>"
    } else {
        &message.content
    }
}

/// Record one outcome for `message`.
pub fn record(message: &ChatMessage, outcome: &str, detail: &str) {
    info!(
        target: "audit",
        message_id = %message.id,
        user_id = %message.author.id,
        user = %message.author.name,
        content = %display_content(message),
        attachments = message.attachments.len(),
        outcome,
        detail,
        "Moderation outcome"
    );
}
