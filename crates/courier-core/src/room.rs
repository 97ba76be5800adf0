//! Conversation rooms.
//!
//! A room is the transient pub/sub topic for one conversation: the set of
//! connection handles currently listening, plus a broadcast channel the
//! relay path publishes into. Room membership is rebuilt from explicit
//! joins and cleared on disconnect; nothing here is durable.

use crate::connection::ConnectionId;
use crate::conversation::ConversationId;
use crate::message::ChatMessage;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default broadcast capacity per room.
const DEFAULT_ROOM_CAPACITY: usize = 256;

/// What flows through a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayKind {
    /// A just-created message, relayed for low-latency rendering.
    Message(ChatMessage),
    /// Transient typing indicator; dropped events are acceptable.
    Typing { user_id: String, is_typing: bool },
}

/// An event published to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEvent {
    /// The conversation this event belongs to.
    pub conversation: ConversationId,
    /// Publishing connection; its own forwarding loop drops the echo.
    pub exclude: Option<ConnectionId>,
    /// Event payload.
    pub kind: RelayKind,
}

impl RelayEvent {
    /// A message-relay event from the given connection.
    #[must_use]
    pub fn message(message: ChatMessage, exclude: Option<ConnectionId>) -> Self {
        Self {
            conversation: message.conversation.clone(),
            exclude,
            kind: RelayKind::Message(message),
        }
    }

    /// A typing-indicator event from the given connection.
    #[must_use]
    pub fn typing(
        conversation: ConversationId,
        user_id: impl Into<String>,
        is_typing: bool,
        exclude: Option<ConnectionId>,
    ) -> Self {
        Self {
            conversation,
            exclude,
            kind: RelayKind::Typing {
                user_id: user_id.into(),
                is_typing,
            },
        }
    }

    /// Whether a subscriber holding `handle` should drop this event.
    #[must_use]
    pub fn excludes(&self, handle: &ConnectionId) -> bool {
        self.exclude.as_ref() == Some(handle)
    }
}

/// A pub/sub room for one conversation.
#[derive(Debug)]
pub struct Room {
    /// Conversation this room relays for.
    conversation: ConversationId,
    /// Broadcast sender for this room.
    sender: broadcast::Sender<Arc<RelayEvent>>,
    /// Set of subscribed connection handles.
    subscribers: HashSet<ConnectionId>,
}

impl Room {
    /// Create a new room.
    #[must_use]
    pub fn new(conversation: ConversationId) -> Self {
        Self::with_capacity(conversation, DEFAULT_ROOM_CAPACITY)
    }

    /// Create a new room with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(conversation: ConversationId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            conversation,
            sender,
            subscribers: HashSet::new(),
        }
    }

    /// The conversation this room belongs to.
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, handle: &ConnectionId) -> bool {
        self.subscribers.contains(handle)
    }

    /// Subscribe a connection to this room.
    ///
    /// Returns a receiver for events on this room. Subscribing an already
    /// subscribed handle hands back a fresh receiver.
    pub fn subscribe(&mut self, handle: ConnectionId) -> broadcast::Receiver<Arc<RelayEvent>> {
        debug!(conversation = %self.conversation, connection = %handle, "Room: subscribed");
        self.subscribers.insert(handle);
        self.sender.subscribe()
    }

    /// Unsubscribe a connection from this room.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, handle: &ConnectionId) -> bool {
        let removed = self.subscribers.remove(handle);
        if removed {
            debug!(conversation = %self.conversation, connection = %handle, "Room: unsubscribed");
        }
        removed
    }

    /// Publish an event to this room.
    ///
    /// Returns the number of receivers the event was handed to, before
    /// sender-echo filtering.
    pub fn publish(&self, event: RelayEvent) -> usize {
        trace!(conversation = %self.conversation, "Room: publishing event");
        self.sender.send(Arc::new(event)).unwrap_or_default()
    }

    /// Check if the room is empty (no subscribers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn conv() -> ConversationId {
        ConversationId::for_pair("alice", "bob").unwrap()
    }

    #[test]
    fn test_room_subscribe_unsubscribe() {
        let mut room = Room::new(conv());
        let h1 = ConnectionId::from("conn-1");
        let h2 = ConnectionId::from("conn-2");

        let _rx = room.subscribe(h1.clone());
        assert_eq!(room.subscriber_count(), 1);
        assert!(room.is_subscribed(&h1));

        let _rx2 = room.subscribe(h2.clone());
        assert_eq!(room.subscriber_count(), 2);

        assert!(room.unsubscribe(&h1));
        assert!(!room.unsubscribe(&h1));
        assert_eq!(room.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_room_publish() {
        let mut room = Room::new(conv());
        let mut rx = room.subscribe(ConnectionId::from("conn-1"));

        let msg = ChatMessage::new("alice", "bob", "hi", MessageKind::Text).unwrap();
        let count = room.publish(RelayEvent::message(msg.clone(), None));
        assert_eq!(count, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, RelayKind::Message(msg));
    }

    #[test]
    fn test_echo_exclusion_marker() {
        let sender = ConnectionId::from("conn-1");
        let other = ConnectionId::from("conn-2");
        let event = RelayEvent::typing(conv(), "alice", true, Some(sender.clone()));

        assert!(event.excludes(&sender));
        assert!(!event.excludes(&other));
    }
}
