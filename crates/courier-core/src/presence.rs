//! Presence registry.
//!
//! Tracks which users are reachable right now. The model is deliberately
//! single-device: at most one live connection per user, and a fresh join
//! replaces whatever was registered before (last writer wins).
//!
//! Removal on disconnect is keyed by handle identity, not user id, so a
//! stale disconnect arriving after the same user already reconnected can
//! never evict the newer session.

use crate::connection::ConnectionId;
use crate::message::now_millis;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the online/offline transition channel.
const EVENT_CAPACITY: usize = 1024;

/// An online/offline transition, broadcast to every registered listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// The user became reachable.
    Online { user_id: String },
    /// The user's connection went away.
    Offline { user_id: String },
}

impl PresenceEvent {
    /// The user this transition is about.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Online { user_id } | Self::Offline { user_id } => user_id,
        }
    }
}

/// Presence state for a single user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    /// The live connection handle.
    pub handle: ConnectionId,
    /// When the user joined, unix milliseconds.
    pub joined_at: u64,
    /// Last activity timestamp, unix milliseconds.
    pub last_seen: u64,
}

impl PresenceEntry {
    fn new(handle: ConnectionId) -> Self {
        let now = now_millis();
        Self {
            handle,
            joined_at: now,
            last_seen: now,
        }
    }
}

/// The single source of truth for "is user U reachable now".
///
/// Maintains the user-to-handle map and its reverse, and broadcasts
/// [`PresenceEvent`] transitions. Operations on different users touch
/// different shards and do not contend.
pub struct PresenceRegistry {
    /// User id to live connection entry.
    entries: DashMap<String, PresenceEntry>,
    /// Reverse lookup: handle to owning user id.
    handles: DashMap<ConnectionId, String>,
    /// Online/offline transition fan-out.
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: DashMap::new(),
            handles: DashMap::new(),
            events,
        }
    }

    /// Register `handle` as the live connection for `user_id`.
    ///
    /// Overwrites any prior entry for the same user and broadcasts
    /// [`PresenceEvent::Online`]. Always succeeds.
    pub fn join(&self, user_id: impl Into<String>, handle: ConnectionId) {
        let user_id = user_id.into();

        self.handles.insert(handle.clone(), user_id.clone());
        let previous = self
            .entries
            .insert(user_id.clone(), PresenceEntry::new(handle.clone()));

        // A superseded handle no longer owns this user; its later
        // disconnect must be a no-op.
        if let Some(prev) = previous {
            if prev.handle != handle {
                self.handles.remove(&prev.handle);
                debug!(user = %user_id, old = %prev.handle, new = %handle, "Presence: session replaced");
            }
        }

        debug!(user = %user_id, connection = %handle, "Presence: joined");
        let _ = self.events.send(PresenceEvent::Online {
            user_id: user_id.clone(),
        });
    }

    /// Remove the entry owned by `handle`, if it still owns one.
    ///
    /// Returns the user that went offline. An unassociated handle (never
    /// joined, or superseded by a later join) is a silent no-op.
    pub fn leave(&self, handle: &ConnectionId) -> Option<String> {
        let (_, user_id) = self.handles.remove(handle)?;

        // Only evict if the entry still points at this exact handle.
        let removed = self
            .entries
            .remove_if(&user_id, |_, entry| entry.handle == *handle);

        if removed.is_some() {
            debug!(user = %user_id, connection = %handle, "Presence: left");
            let _ = self.events.send(PresenceEvent::Offline {
                user_id: user_id.clone(),
            });
            Some(user_id)
        } else {
            None
        }
    }

    /// Whether the user currently has a live connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// The live connection handle for a user, if any.
    #[must_use]
    pub fn resolve(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries.get(user_id).map(|e| e.handle.clone())
    }

    /// The user owning a handle, if the handle is current.
    #[must_use]
    pub fn user_of(&self, handle: &ConnectionId) -> Option<String> {
        self.handles.get(handle).map(|u| u.value().clone())
    }

    /// Update a user's last-seen timestamp.
    pub fn touch(&self, user_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(user_id) {
            entry.last_seen = now_millis();
        }
    }

    /// Number of users currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Subscribe to online/offline transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
