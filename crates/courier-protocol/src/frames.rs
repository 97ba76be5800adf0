//! Frame types for the Courier protocol.
//!
//! Frames are the fundamental unit of communication on the realtime
//! channel. Each frame is serialized using MessagePack for efficient
//! binary encoding.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Join = 0x01,
    JoinRoom = 0x02,
    SendMessage = 0x03,
    Typing = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Connect = 0x09,
    Connected = 0x0A,
    UserOnline = 0x0B,
    UserOffline = 0x0C,
    NewMessage = 0x0D,
    UserTyping = 0x0E,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Join),
            0x02 => Ok(FrameType::JoinRoom),
            0x03 => Ok(FrameType::SendMessage),
            0x04 => Ok(FrameType::Typing),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x09 => Ok(FrameType::Connect),
            0x0A => Ok(FrameType::Connected),
            0x0B => Ok(FrameType::UserOnline),
            0x0C => Ok(FrameType::UserOffline),
            0x0D => Ok(FrameType::NewMessage),
            0x0E => Ok(FrameType::UserTyping),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Content kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMessageKind {
    Text,
    Attachment,
    System,
}

/// The wire rendering of a message record: enough of the stored message
/// for a client to display it without a storage round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message id.
    pub id: u64,
    /// Canonical conversation key.
    pub conversation: String,
    /// Sending user.
    pub sender_id: String,
    /// Receiving user.
    pub recipient_id: String,
    /// Text content or attachment reference.
    pub content: String,
    /// Content kind.
    pub kind: WireMessageKind,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Read-receipt state at the time of sending.
    pub is_read: bool,
    /// Read-receipt timestamp, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<u64>,
}

/// A protocol frame.
///
/// Frames are the events exchanged between clients and servers.
/// Each frame type has specific fields relevant to its operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Announce the connection's user identity and go online.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// The user this connection belongs to.
        user_id: String,
        /// Display name to seed the directory with.
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        /// Avatar location to seed the directory with.
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },

    /// Subscribe to a conversation topic.
    #[serde(rename = "join_room")]
    JoinRoom {
        /// Request ID for acknowledgment.
        id: u64,
        /// Canonical conversation key.
        conversation: String,
    },

    /// Relay a message to the conversation's subscribers.
    #[serde(rename = "send_message")]
    SendMessage {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Target conversation.
        conversation: String,
        /// The message record to relay.
        message: WireMessage,
    },

    /// Typing indicator from the client.
    #[serde(rename = "typing")]
    Typing {
        /// Target conversation.
        conversation: String,
        /// Whether the user started or stopped typing.
        is_typing: bool,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Initial connection handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Optional authentication token.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A user became reachable.
    #[serde(rename = "user_online")]
    UserOnline {
        /// The user that came online.
        user_id: String,
    },

    /// A user's connection went away.
    #[serde(rename = "user_offline")]
    UserOffline {
        /// The user that went offline.
        user_id: String,
    },

    /// A relayed message, delivered to conversation subscribers.
    #[serde(rename = "new_message")]
    NewMessage {
        /// Source conversation.
        conversation: String,
        /// The message record.
        message: WireMessage,
    },

    /// A relayed typing indicator.
    #[serde(rename = "user_typing")]
    UserTyping {
        /// Source conversation.
        conversation: String,
        /// The typing user.
        user_id: String,
        /// Whether the user started or stopped typing.
        is_typing: bool,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::JoinRoom { .. } => FrameType::JoinRoom,
            Frame::SendMessage { .. } => FrameType::SendMessage,
            Frame::Typing { .. } => FrameType::Typing,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::UserOnline { .. } => FrameType::UserOnline,
            Frame::UserOffline { .. } => FrameType::UserOffline,
            Frame::NewMessage { .. } => FrameType::NewMessage,
            Frame::UserTyping { .. } => FrameType::UserTyping,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, user_id: impl Into<String>) -> Self {
        Frame::Join {
            id,
            user_id: user_id.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    /// Create a new JoinRoom frame.
    #[must_use]
    pub fn join_room(id: u64, conversation: impl Into<String>) -> Self {
        Frame::JoinRoom {
            id,
            conversation: conversation.into(),
        }
    }

    /// Create a new SendMessage frame.
    #[must_use]
    pub fn send_message(id: Option<u64>, message: WireMessage) -> Self {
        Frame::SendMessage {
            id,
            conversation: message.conversation.clone(),
            message,
        }
    }

    /// Create a new Typing frame.
    #[must_use]
    pub fn typing(conversation: impl Into<String>, is_typing: bool) -> Self {
        Frame::Typing {
            conversation: conversation.into(),
            is_typing,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new UserOnline frame.
    #[must_use]
    pub fn user_online(user_id: impl Into<String>) -> Self {
        Frame::UserOnline {
            user_id: user_id.into(),
        }
    }

    /// Create a new UserOffline frame.
    #[must_use]
    pub fn user_offline(user_id: impl Into<String>) -> Self {
        Frame::UserOffline {
            user_id: user_id.into(),
        }
    }

    /// Create a new NewMessage frame.
    #[must_use]
    pub fn new_message(message: WireMessage) -> Self {
        Frame::NewMessage {
            conversation: message.conversation.clone(),
            message,
        }
    }

    /// Create a new UserTyping frame.
    #[must_use]
    pub fn user_typing(
        conversation: impl Into<String>,
        user_id: impl Into<String>,
        is_typing: bool,
    ) -> Self {
        Frame::UserTyping {
            conversation: conversation.into(),
            user_id: user_id.into(),
            is_typing,
        }
    }
}
