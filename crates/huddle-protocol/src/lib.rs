//! # huddle-protocol
//!
//! Wire protocol definitions for Huddle chat rooms.
//!
//! Clients send [`ClientFrame`]s and receive [`ServerFrame`]s. Every frame is
//! MessagePack-encoded behind a 4-byte big-endian length prefix.
//!
//! ## Frame Types
//!
//! - `Login` / `Welcome` - Handshake: pick a room and a display name
//! - `Chat` - Text from one participant to the rest of the room
//! - `Tick` - Room heartbeat carrying the room-wide counter
//! - `Error` - Handshake or protocol failures
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::chat("Hello, world!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, ErrorCode, ServerFrame};
pub use version::{Version, PROTOCOL_VERSION};
