//! Conversation summaries.
//!
//! The read side of the system: for one requesting user, derive a single
//! summary row per counterpart by reducing that user's message logs and
//! annotating with presence. Summaries are recomputed per query and never
//! stored; their staleness window is bounded only by how often they are
//! asked for.

use crate::conversation::ConversationId;
use crate::message::ChatMessage;
use crate::presence::PresenceRegistry;
use crate::store::MessageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// The minimal identity fields needed to render a conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Avatar location, if any.
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// A profile with nothing but the id; used when the identity
    /// collaborator has never seen this user.
    #[must_use]
    pub fn bare(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            avatar_url: None,
        }
    }
}

/// Identity lookup seam; the real resolver lives outside this crate.
pub trait UserDirectory: Send + Sync {
    /// The profile for a user, if known.
    fn profile(&self, user_id: &str) -> Option<UserProfile>;
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    /// Conversation key.
    pub conversation: ConversationId,
    /// The other participant.
    pub counterpart: UserProfile,
    /// Point-in-time presence read for the counterpart; can be stale the
    /// instant after it is taken.
    pub counterpart_online: bool,
    /// Most recent message in the conversation.
    pub last_message: ChatMessage,
    /// Messages addressed to the requesting user still unread.
    pub unread_count: usize,
}

/// Derives per-user conversation lists from the store and the registry.
///
/// Pure read path: no mutation, and nothing here sits on the relay path.
pub struct ConversationAggregator {
    store: Arc<MessageStore>,
    presence: Arc<PresenceRegistry>,
}

impl ConversationAggregator {
    /// Create an aggregator over the given store and registry.
    #[must_use]
    pub fn new(store: Arc<MessageStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self { store, presence }
    }

    /// One summary per counterpart of `user_id`, most recently active
    /// conversation first.
    ///
    /// The last message is the greatest (created_at, seq) in its log, the
    /// same tie-break the store uses for pagination, so output order is
    /// deterministic even for equal timestamps.
    #[must_use]
    pub fn list_conversations(
        &self,
        user_id: &str,
        directory: &dyn UserDirectory,
    ) -> Vec<ConversationSummary> {
        let mut summaries = Vec::new();

        for conversation in self.store.conversation_ids_for(user_id) {
            let Some(messages) = self.store.snapshot(&conversation) else {
                continue;
            };
            let Some(last_message) = messages.iter().max_by_key(|m| m.order_key()).cloned()
            else {
                continue;
            };

            let unread_count = messages.iter().filter(|m| m.unread_for(user_id)).count();

            // The counterpart is whichever side of the last message isn't us.
            let counterpart_id = if last_message.sender_id == user_id {
                last_message.recipient_id.as_str()
            } else {
                last_message.sender_id.as_str()
            };

            let counterpart = directory
                .profile(counterpart_id)
                .unwrap_or_else(|| UserProfile::bare(counterpart_id));
            let counterpart_online = self.presence.is_online(counterpart_id);

            summaries.push(ConversationSummary {
                conversation,
                counterpart,
                counterpart_online,
                last_message,
                unread_count,
            });
        }

        summaries.sort_by(|a, b| b.last_message.order_key().cmp(&a.last_message.order_key()));

        trace!(user = %user_id, rows = summaries.len(), "Aggregated conversations");
        summaries
    }
}
