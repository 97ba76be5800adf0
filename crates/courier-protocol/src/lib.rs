//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime channel.
//!
//! This crate defines the binary protocol spoken between Courier clients
//! and servers, including frame types, the codec, and versioning.
//!
//! ## Frame types
//!
//! - `Join` - announce the connection's user identity
//! - `JoinRoom` - subscribe to a conversation topic
//! - `SendMessage` / `NewMessage` - message relay, inbound and outbound
//! - `Typing` / `UserTyping` - typing indicators
//! - `UserOnline` / `UserOffline` - presence transitions
//! - `Ack` / `Error` - acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Frame};
//!
//! let frame = Frame::join(1, "alice");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, WireMessage, WireMessageKind};
pub use version::{Version, PROTOCOL_VERSION};
