use chrono::{DateTime, Utc};
use vibe_channels::{MessageId, UserId};

/// One pending ask: "what did `clarifier_id` mean by message `message_id`?"
///
/// Carries the requester's identity, so it is never serialized; status
/// surfaces map it to their own views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarificationRequest {
    pub message_id: MessageId,
    pub requester_id: UserId,
    pub clarifier_id: UserId,
    /// Snapshot of the message text taken at enqueue time.
    pub content: String,
    pub is_clarified: bool,
    pub enqueued_at: DateTime<Utc>,
}

impl ClarificationRequest {
    pub fn new(
        clarifier_id: UserId,
        requester_id: UserId,
        message_id: MessageId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            requester_id,
            clarifier_id,
            content: content.into(),
            is_clarified: false,
            enqueued_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.is_clarified
    }
}
