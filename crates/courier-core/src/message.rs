//! Chat message records.
//!
//! A [`ChatMessage`] is immutable once stored except for its read-receipt
//! pair (`is_read`/`read_at`), which transitions false to true exactly once.

use crate::conversation::ConversationId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    // Combine timestamp with atomic counter for guaranteed uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Current wall clock in unix milliseconds.
#[must_use]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Reference to an uploaded attachment.
    Attachment,
    /// Server-generated notice.
    System,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Store-assigned sequence number; breaks `created_at` ties.
    pub seq: u64,
    /// Canonical conversation key for the participant pair.
    pub conversation: ConversationId,
    /// Sending user.
    pub sender_id: String,
    /// Receiving user.
    pub recipient_id: String,
    /// Text content or attachment reference.
    pub content: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Unix milliseconds, assigned at persistence time.
    pub created_at: u64,
    /// Whether the recipient has read this message.
    pub is_read: bool,
    /// When the read receipt was recorded, if ever.
    pub read_at: Option<u64>,
}

impl ChatMessage {
    /// Build an unstored message.
    ///
    /// `seq` stays 0 until the store appends the message; relayed-only
    /// copies keep it at 0.
    ///
    /// # Errors
    ///
    /// Returns an error message if either participant id is invalid.
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Self, &'static str> {
        let sender_id = sender_id.into();
        let recipient_id = recipient_id.into();
        let conversation = ConversationId::for_pair(&sender_id, &recipient_id)?;

        Ok(Self {
            id: generate_message_id(),
            seq: 0,
            conversation,
            sender_id,
            recipient_id,
            content: content.into(),
            kind,
            created_at: now_millis(),
            is_read: false,
            read_at: None,
        })
    }

    /// The ordering key used for pagination and aggregation tie-breaks.
    #[must_use]
    pub fn order_key(&self) -> (u64, u64) {
        (self.created_at, self.seq)
    }

    /// Whether this message is unread mail for `user_id`.
    #[must_use]
    pub fn unread_for(&self, user_id: &str) -> bool {
        !self.is_read && self.recipient_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = ChatMessage::new("alice", "bob", "hi", MessageKind::Text).unwrap();
        assert_eq!(msg.conversation.as_str(), "alice:bob");
        assert_eq!(msg.seq, 0);
        assert!(!msg.is_read);
        assert!(msg.read_at.is_none());
    }

    #[test]
    fn test_message_rejects_bad_ids() {
        assert!(ChatMessage::new("", "bob", "hi", MessageKind::Text).is_err());
        assert!(ChatMessage::new("a:b", "bob", "hi", MessageKind::Text).is_err());
    }

    #[test]
    fn test_unread_for() {
        let mut msg = ChatMessage::new("alice", "bob", "hi", MessageKind::Text).unwrap();
        assert!(msg.unread_for("bob"));
        assert!(!msg.unread_for("alice"));

        msg.is_read = true;
        assert!(!msg.unread_for("bob"));
    }

    #[test]
    fn test_unique_message_ids() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
    }
}
