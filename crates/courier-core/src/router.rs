//! Room-based relay router.
//!
//! The router owns the topic map ("who is listening to what") and keeps it
//! cleanly separated from the presence registry ("who is connected"). It
//! fans out messages and typing indicators without touching storage.

use crate::connection::ConnectionId;
use crate::conversation::ConversationId;
use crate::room::{RelayEvent, Room};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid conversation key.
    #[error("Invalid conversation id: {0}")]
    InvalidConversation(&'static str),

    /// Not subscribed to the conversation's room.
    #[error("Not subscribed to conversation: {0}")]
    NotSubscribed(ConversationId),

    /// Maximum rooms reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,

    /// Maximum subscriptions per connection reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Room broadcast capacity.
    pub room_capacity: usize,
    /// Whether to drop rooms once their last subscriber leaves.
    pub auto_delete_empty_rooms: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_subscriptions_per_connection: 100,
            room_capacity: 256,
            auto_delete_empty_rooms: true,
        }
    }
}

/// The central relay router.
///
/// Subscribe/unsubscribe/publish for one conversation serialize on that
/// room's shard; different conversations proceed in parallel.
pub struct RoomRouter {
    /// Rooms indexed by conversation.
    rooms: DashMap<ConversationId, Room>,
    /// Connection subscriptions (handle -> set of conversations).
    subscriptions: DashMap<ConnectionId, dashmap::DashSet<ConversationId>>,
    /// Configuration.
    config: RouterConfig,
}

impl RoomRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating room router with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            room_count: self.rooms.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Subscribe a connection to a conversation's room.
    ///
    /// Idempotent: a handle that is already subscribed gets a fresh
    /// receiver instead of an error. Returns a receiver for events on the
    /// room.
    ///
    /// # Errors
    ///
    /// Returns an error if subscription or room limits are exceeded.
    pub fn subscribe(
        &self,
        handle: &ConnectionId,
        conversation: &ConversationId,
    ) -> Result<broadcast::Receiver<Arc<RelayEvent>>, RouterError> {
        let conn_subs = self.subscriptions.entry(handle.clone()).or_default();

        let already_subscribed = conn_subs.contains(conversation);
        if !already_subscribed
            && conn_subs.len() >= self.config.max_subscriptions_per_connection
        {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        if !self.rooms.contains_key(conversation) && self.rooms.len() >= self.config.max_rooms {
            return Err(RouterError::MaxRoomsReached);
        }

        let mut room = self.rooms.entry(conversation.clone()).or_insert_with(|| {
            debug!(conversation = %conversation, "Creating room");
            Room::with_capacity(conversation.clone(), self.config.room_capacity)
        });

        let receiver = room.subscribe(handle.clone());
        conn_subs.insert(conversation.clone());

        debug!(
            conversation = %conversation,
            connection = %handle,
            subscribers = room.subscriber_count(),
            "Subscribed"
        );

        Ok(receiver)
    }

    /// Unsubscribe a connection from a conversation's room.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(
        &self,
        handle: &ConnectionId,
        conversation: &ConversationId,
    ) -> Result<(), RouterError> {
        let subscribed = self
            .subscriptions
            .get(handle)
            .is_some_and(|subs| subs.remove(conversation).is_some());

        if !subscribed {
            return Err(RouterError::NotSubscribed(conversation.clone()));
        }

        if let Some(mut room) = self.rooms.get_mut(conversation) {
            room.unsubscribe(handle);

            debug!(
                conversation = %conversation,
                connection = %handle,
                subscribers = room.subscriber_count(),
                "Unsubscribed"
            );

            if self.config.auto_delete_empty_rooms && room.is_empty() {
                drop(room); // Release the shard lock
                self.rooms.remove(conversation);
                debug!(conversation = %conversation, "Deleted empty room");
            }
        }

        Ok(())
    }

    /// Unsubscribe a connection from every room; invoked on disconnect.
    pub fn unsubscribe_all(&self, handle: &ConnectionId) {
        if let Some((_, conversations)) = self.subscriptions.remove(handle) {
            for conversation in conversations.iter() {
                if let Some(mut room) = self.rooms.get_mut(conversation.key()) {
                    room.unsubscribe(handle);

                    if self.config.auto_delete_empty_rooms && room.is_empty() {
                        let key = conversation.key().clone();
                        drop(room);
                        self.rooms.remove(&key);
                    }
                }
            }
        }

        debug!(connection = %handle, "Unsubscribed from all rooms");
    }

    /// Publish an event to its conversation's room.
    ///
    /// Best effort: returns the number of subscribers handed the event
    /// (before sender-echo filtering), or 0 if the room does not exist.
    pub fn publish(&self, event: RelayEvent) -> usize {
        let conversation = event.conversation.clone();

        if let Some(room) = self.rooms.get(&conversation) {
            let count = room.publish(event);
            trace!(conversation = %conversation, recipients = count, "Published event");
            count
        } else {
            warn!(conversation = %conversation, "Publish to non-existent room");
            0
        }
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, conversation: &ConversationId) -> bool {
        self.rooms.contains_key(conversation)
    }

    /// Get the subscriber count for a conversation's room.
    #[must_use]
    pub fn subscriber_count(&self, conversation: &ConversationId) -> usize {
        self.rooms
            .get(conversation)
            .map(|r| r.subscriber_count())
            .unwrap_or(0)
    }

    /// Get the conversations a connection is subscribed to.
    #[must_use]
    pub fn connection_rooms(&self, handle: &ConnectionId) -> Vec<ConversationId> {
        self.subscriptions
            .get(handle)
            .map(|s| s.iter().map(|c| c.key().clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections holding subscriptions.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatMessage, MessageKind};
    use crate::room::RelayKind;

    fn conv(a: &str, b: &str) -> ConversationId {
        ConversationId::for_pair(a, b).unwrap()
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let router = RoomRouter::new();
        let h = ConnectionId::from("conn-1");
        let c = conv("alice", "bob");

        let rx = router.subscribe(&h, &c).unwrap();
        assert!(router.room_exists(&c));
        assert_eq!(router.subscriber_count(&c), 1);
        drop(rx);

        router.unsubscribe(&h, &c).unwrap();
        // Room should be auto-deleted
        assert!(!router.room_exists(&c));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let router = RoomRouter::new();
        let h = ConnectionId::from("conn-1");
        let c = conv("alice", "bob");

        let _rx1 = router.subscribe(&h, &c).unwrap();
        let _rx2 = router.subscribe(&h, &c).unwrap();

        assert_eq!(router.subscriber_count(&c), 1);
        assert_eq!(router.stats().total_subscriptions, 1);
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let router = RoomRouter::new();
        let c = conv("alice", "bob");

        let mut rx1 = router
            .subscribe(&ConnectionId::from("conn-1"), &c)
            .unwrap();
        let mut rx2 = router
            .subscribe(&ConnectionId::from("conn-2"), &c)
            .unwrap();

        let msg = ChatMessage::new("alice", "bob", "hi", MessageKind::Text).unwrap();
        let count = router.publish(RelayEvent::message(msg, None));
        assert_eq!(count, 2);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_room_is_dropped() {
        let router = RoomRouter::new();
        let event = RelayEvent::typing(conv("alice", "bob"), "alice", true, None);
        assert_eq!(router.publish(event), 0);
    }

    #[test]
    fn test_typing_events_carry_exclusion() {
        let router = RoomRouter::new();
        let c = conv("alice", "bob");
        let sender = ConnectionId::from("conn-1");

        let mut sender_rx = router.subscribe(&sender, &c).unwrap();
        let mut other_rx = router
            .subscribe(&ConnectionId::from("conn-2"), &c)
            .unwrap();

        router.publish(RelayEvent::typing(c, "alice", true, Some(sender.clone())));

        // Broadcast hands the event to both; the sender's forwarding loop
        // is responsible for dropping its own echo.
        let echoed = sender_rx.try_recv().unwrap();
        assert!(echoed.excludes(&sender));

        let delivered = other_rx.try_recv().unwrap();
        assert!(!delivered.excludes(&ConnectionId::from("conn-2")));
        assert!(matches!(
            delivered.kind,
            RelayKind::Typing { is_typing: true, .. }
        ));
    }

    #[test]
    fn test_unsubscribe_all() {
        let router = RoomRouter::new();
        let h = ConnectionId::from("conn-1");
        let c1 = conv("alice", "bob");
        let c2 = conv("alice", "carol");

        let _rx1 = router.subscribe(&h, &c1).unwrap();
        let _rx2 = router.subscribe(&h, &c2).unwrap();

        router.unsubscribe_all(&h);

        assert!(!router.room_exists(&c1));
        assert!(!router.room_exists(&c2));
        assert_eq!(router.stats().connection_count, 0);
    }

    #[test]
    fn test_subscription_limit() {
        let router = RoomRouter::with_config(RouterConfig {
            max_subscriptions_per_connection: 1,
            ..RouterConfig::default()
        });
        let h = ConnectionId::from("conn-1");

        let _rx = router.subscribe(&h, &conv("alice", "bob")).unwrap();
        assert!(matches!(
            router.subscribe(&h, &conv("alice", "carol")),
            Err(RouterError::MaxSubscriptionsReached)
        ));
        // Re-subscribing to an existing room stays allowed.
        assert!(router.subscribe(&h, &conv("alice", "bob")).is_ok());
    }

    #[test]
    fn test_stats() {
        let router = RoomRouter::new();
        let h1 = ConnectionId::from("conn-1");
        let h2 = ConnectionId::from("conn-2");

        let _rx1 = router.subscribe(&h1, &conv("alice", "bob")).unwrap();
        let _rx2 = router.subscribe(&h1, &conv("alice", "carol")).unwrap();
        let _rx3 = router.subscribe(&h2, &conv("alice", "bob")).unwrap();

        let stats = router.stats();
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }
}
