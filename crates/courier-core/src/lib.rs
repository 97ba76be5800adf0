//! # courier-core
//!
//! Core state machines for the Courier direct-messaging engine.
//!
//! This crate provides the four components that carry real state:
//!
//! - **PresenceRegistry** - who is reachable right now, one live connection per user
//! - **RoomRouter** - per-conversation pub/sub relay for messages and typing signals
//! - **MessageStore** - append-only, ordered message log with read receipts
//! - **ConversationAggregator** - per-user conversation summaries derived from the log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ RoomRouter  │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │ relay path
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Presence   │◀────│ Aggregator  │────▶│MessageStore │
//! │  Registry   │     └─────────────┘     └─────────────┘
//! └─────────────┘        read side          durable path
//! ```
//!
//! The relay path and the durable path are independent: a sent message is
//! appended to the [`MessageStore`] and published through the [`RoomRouter`]
//! as two separate operations, neither calling the other.

pub mod connection;
pub mod conversation;
pub mod conversations;
pub mod message;
pub mod presence;
pub mod room;
pub mod router;
pub mod store;

pub use connection::ConnectionId;
pub use conversation::ConversationId;
pub use conversations::{ConversationAggregator, ConversationSummary, UserDirectory, UserProfile};
pub use message::{ChatMessage, MessageKind};
pub use presence::{PresenceEvent, PresenceRegistry};
pub use room::{RelayEvent, RelayKind, Room};
pub use router::{RoomRouter, RouterConfig, RouterError};
pub use store::{MessageStore, StoreConfig, StoreError};
