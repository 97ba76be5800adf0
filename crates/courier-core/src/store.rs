//! Message store.
//!
//! Append-only, per-conversation message logs with mutable read state.
//! This is the durable path: every sent message lands here, ordered by a
//! global sequence counter so pagination and aggregation see a strict
//! total order even when wall-clock timestamps collide.
//!
//! Writes to the same conversation serialize on that log's shard; writes
//! to different conversations proceed concurrently. Reads clone a
//! consistent snapshot and never observe a half-applied write.

use crate::conversation::ConversationId;
use crate::message::{now_millis, ChatMessage, MessageKind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed or missing message fields; caller-recoverable.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// The persistence tier refused the write; transient, retry is the
    /// caller's call.
    #[error("Conversation log full: {0}")]
    CapacityExceeded(ConversationId),
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hard bound on messages retained per conversation.
    pub max_messages_per_conversation: usize,
    /// Hard bound on content length in bytes.
    pub max_content_length: usize,
    /// History page size when the caller does not provide one.
    pub default_page_size: usize,
    /// Upper clamp on the caller-provided page size.
    pub max_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: 100_000,
            max_content_length: 4096,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

#[derive(Debug, Default)]
struct ConversationLog {
    /// Messages in append order, which is also (created_at, seq) order.
    messages: Vec<ChatMessage>,
}

/// The append-only message log, grouped by conversation.
pub struct MessageStore {
    /// Per-conversation logs.
    logs: DashMap<ConversationId, ConversationLog>,
    /// Global append sequence; assigned under the conversation's shard lock.
    seq: AtomicU64,
    /// Configuration.
    config: StoreConfig,
}

impl MessageStore {
    /// Create a store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with custom configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            logs: DashMap::new(),
            seq: AtomicU64::new(0),
            config,
        }
    }

    /// Persist a new message and return the stored record.
    ///
    /// The conversation key is derived from the canonicalized participant
    /// pair; `created_at` and the tie-breaking sequence number are assigned
    /// here, at persistence time.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidMessage`] on malformed input,
    /// [`StoreError::CapacityExceeded`] when the log refuses the write.
    pub fn send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage, StoreError> {
        if content.is_empty() {
            return Err(StoreError::InvalidMessage("Content cannot be empty"));
        }
        if content.len() > self.config.max_content_length {
            return Err(StoreError::InvalidMessage("Content too long"));
        }

        let mut message = ChatMessage::new(sender_id, recipient_id, content, kind)
            .map_err(StoreError::InvalidMessage)?;

        let mut log = self.logs.entry(message.conversation.clone()).or_default();
        if log.messages.len() >= self.config.max_messages_per_conversation {
            return Err(StoreError::CapacityExceeded(message.conversation.clone()));
        }

        // Assigned while holding the shard lock, so per-conversation append
        // order and sequence order never diverge. The timestamp is clamped
        // against the log tail; a backwards clock step must not make
        // (created_at, seq) disagree with append order.
        message.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        message.created_at =
            now_millis().max(log.messages.last().map_or(0, |m| m.created_at));
        log.messages.push(message.clone());

        trace!(
            conversation = %message.conversation,
            sender = %sender_id,
            seq = message.seq,
            "Stored message"
        );

        Ok(message)
    }

    /// Fetch one page of a conversation's history, ascending.
    ///
    /// Pages count from the most recent end: page 1 is the newest `limit`
    /// messages, returned oldest-first within the page. Missing or zero
    /// values default to page 1 and the configured page size; `limit` is
    /// clamped to the configured maximum.
    #[must_use]
    pub fn history(
        &self,
        conversation: &ConversationId,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Vec<ChatMessage> {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size);

        let Some(log) = self.logs.get(conversation) else {
            return Vec::new();
        };

        let total = log.messages.len();
        // Page is caller-controlled; saturating keeps any page past the
        // log at an empty slice instead of overflowing.
        let end = total.saturating_sub((page - 1).saturating_mul(limit));
        let start = end.saturating_sub(limit);
        log.messages[start..end].to_vec()
    }

    /// Record read receipts for every unread message addressed to `reader`
    /// in the conversation. Returns the number of messages affected.
    ///
    /// Idempotent: receipts already recorded are left untouched, so an
    /// immediate second call returns 0.
    pub fn mark_read(&self, conversation: &ConversationId, reader_id: &str) -> usize {
        let Some(mut log) = self.logs.get_mut(conversation) else {
            return 0;
        };

        let now = now_millis();
        let mut affected = 0;
        for message in &mut log.messages {
            if message.unread_for(reader_id) {
                message.is_read = true;
                message.read_at = Some(now);
                affected += 1;
            }
        }

        if affected > 0 {
            debug!(conversation = %conversation, reader = %reader_id, affected, "Marked read");
        }
        affected
    }

    /// Total unread messages addressed to `user_id` across all conversations.
    #[must_use]
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.logs
            .iter()
            .filter(|entry| entry.key().involves(user_id))
            .map(|entry| {
                entry
                    .messages
                    .iter()
                    .filter(|m| m.unread_for(user_id))
                    .count()
            })
            .sum()
    }

    /// The conversations `user_id` participates in that hold any messages.
    #[must_use]
    pub fn conversation_ids_for(&self, user_id: &str) -> Vec<ConversationId> {
        self.logs
            .iter()
            .filter(|entry| entry.key().involves(user_id) && !entry.messages.is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// A point-in-time copy of one conversation's full log, ascending.
    #[must_use]
    pub fn snapshot(&self, conversation: &ConversationId) -> Option<Vec<ChatMessage>> {
        self.logs.get(conversation).map(|log| log.messages.clone())
    }

    /// Number of messages stored in a conversation.
    #[must_use]
    pub fn message_count(&self, conversation: &ConversationId) -> usize {
        self.logs
            .get(conversation)
            .map(|log| log.messages.len())
            .unwrap_or(0)
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(a: &str, b: &str) -> ConversationId {
        ConversationId::for_pair(a, b).unwrap()
    }

    #[test]
    fn test_send_assigns_sequence_and_conversation() {
        let store = MessageStore::new();

        let m1 = store.send("alice", "bob", "hi", MessageKind::Text).unwrap();
        let m2 = store.send("bob", "alice", "hey", MessageKind::Text).unwrap();

        // Both directions land in the same canonical conversation.
        assert_eq!(m1.conversation, conv("alice", "bob"));
        assert_eq!(m2.conversation, m1.conversation);
        assert!(m2.seq > m1.seq);
        assert!(!m1.is_read);
    }

    #[test]
    fn test_send_validation() {
        let store = MessageStore::new();

        assert!(matches!(
            store.send("alice", "bob", "", MessageKind::Text),
            Err(StoreError::InvalidMessage(_))
        ));
        assert!(matches!(
            store.send("alice", "", "hi", MessageKind::Text),
            Err(StoreError::InvalidMessage(_))
        ));

        let oversized = "x".repeat(StoreConfig::default().max_content_length + 1);
        assert!(matches!(
            store.send("alice", "bob", &oversized, MessageKind::Text),
            Err(StoreError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_capacity_exceeded_is_storage_error() {
        let store = MessageStore::with_config(StoreConfig {
            max_messages_per_conversation: 2,
            ..StoreConfig::default()
        });

        store.send("alice", "bob", "1", MessageKind::Text).unwrap();
        store.send("alice", "bob", "2", MessageKind::Text).unwrap();
        assert!(matches!(
            store.send("alice", "bob", "3", MessageKind::Text),
            Err(StoreError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_history_page_defaults() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        for i in 0..3 {
            store
                .send("alice", "bob", &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        // Missing and non-positive values fall back to page 1 / default limit.
        let all = store.history(&c, None, None);
        assert_eq!(all.len(), 3);
        assert_eq!(store.history(&c, Some(0), Some(0)), all);
    }

    #[test]
    fn test_history_counts_pages_from_newest_end() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        for i in 0..5 {
            store
                .send("alice", "bob", &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        // Page 1 = the two newest messages, oldest-first within the page.
        let page1 = store.history(&c, Some(1), Some(2));
        assert_eq!(
            page1.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["m3", "m4"]
        );

        let page2 = store.history(&c, Some(2), Some(2));
        assert_eq!(
            page2.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["m1", "m2"]
        );

        // The last page is partial; beyond it, empty.
        let page3 = store.history(&c, Some(3), Some(2));
        assert_eq!(
            page3.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["m0"]
        );
        assert!(store.history(&c, Some(4), Some(2)).is_empty());
    }

    #[test]
    fn test_history_page_far_beyond_log_is_empty() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        for i in 0..3 {
            store
                .send("alice", "bob", &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        // The offset arithmetic must not wrap for extreme page numbers.
        assert!(store.history(&c, Some(usize::MAX), Some(500)).is_empty());
        assert!(store.history(&c, Some(usize::MAX), Some(2)).is_empty());
        assert!(store.history(&c, Some(usize::MAX / 2), None).is_empty());
    }

    #[test]
    fn test_history_pages_partition_the_log() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        for i in 0..7 {
            store
                .send("alice", "bob", &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        // Concatenating pages newest-to-oldest reproduces the ascending log
        // with no duplicates or gaps.
        let limit = 3;
        let mut pages = Vec::new();
        for page in (1..=3).rev() {
            pages.extend(store.history(&c, Some(page), Some(limit)));
        }
        assert_eq!(pages, store.history(&c, None, Some(500)));
        let seqs: Vec<u64> = pages.iter().map(|m| m.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_append_order_matches_timestamp_order() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        for i in 0..50 {
            store
                .send("alice", "bob", &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        // created_at never regresses along the log and the (created_at, seq)
        // key is strictly increasing in append order.
        let log = store.snapshot(&c).unwrap();
        assert!(log.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(log.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        store.send("alice", "bob", "hi", MessageKind::Text).unwrap();
        store.send("alice", "bob", "you there?", MessageKind::Text).unwrap();

        assert_eq!(store.mark_read(&c, "bob"), 2);
        let first_receipts: Vec<Option<u64>> = store
            .snapshot(&c)
            .unwrap()
            .iter()
            .map(|m| m.read_at)
            .collect();
        assert!(first_receipts.iter().all(Option::is_some));

        assert_eq!(store.mark_read(&c, "bob"), 0);
        let second_receipts: Vec<Option<u64>> = store
            .snapshot(&c)
            .unwrap()
            .iter()
            .map(|m| m.read_at)
            .collect();
        assert_eq!(first_receipts, second_receipts);
    }

    #[test]
    fn test_mark_read_only_touches_addressee() {
        let store = MessageStore::new();
        let c = conv("alice", "bob");
        store.send("alice", "bob", "to bob", MessageKind::Text).unwrap();
        store.send("bob", "alice", "to alice", MessageKind::Text).unwrap();

        assert_eq!(store.mark_read(&c, "bob"), 1);
        assert_eq!(store.unread_count("bob"), 0);
        assert_eq!(store.unread_count("alice"), 1);
    }

    #[test]
    fn test_unread_count_spans_conversations() {
        let store = MessageStore::new();
        store.send("alice", "bob", "1", MessageKind::Text).unwrap();
        store.send("carol", "bob", "2", MessageKind::Text).unwrap();
        store.send("carol", "bob", "3", MessageKind::Text).unwrap();
        store.send("bob", "alice", "out", MessageKind::Text).unwrap();

        assert_eq!(store.unread_count("bob"), 3);
        store.mark_read(&conv("bob", "carol"), "bob");
        assert_eq!(store.unread_count("bob"), 1);
    }

    #[test]
    fn test_conversation_ids_for() {
        let store = MessageStore::new();
        store.send("alice", "bob", "1", MessageKind::Text).unwrap();
        store.send("alice", "carol", "2", MessageKind::Text).unwrap();
        store.send("carol", "dave", "3", MessageKind::Text).unwrap();

        let mut ids = store.conversation_ids_for("alice");
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ids, vec![conv("alice", "bob"), conv("alice", "carol")]);
        assert!(store.conversation_ids_for("eve").is_empty());
    }
}
