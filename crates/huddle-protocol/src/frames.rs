//! Frame types for the Huddle protocol.
//!
//! Frames are the fundamental unit of communication between a connection and
//! the server. Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::version::{Version, PROTOCOL_VERSION};

/// Error codes carried by [`ServerFrame::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    /// First frame on a connection was not a login.
    ExpectedLogin = 1001,
    /// Client speaks an incompatible protocol version.
    IncompatibleVersion = 1002,
    /// Room key rejected.
    InvalidRoom = 1003,
    /// Display name rejected.
    InvalidName = 1004,
    /// No login arrived before the deadline.
    LoginTimeout = 1005,
    /// Frame could not be decoded.
    MalformedFrame = 1006,
    /// Server-side failure.
    Internal = 1500,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1001 => Ok(ErrorCode::ExpectedLogin),
            1002 => Ok(ErrorCode::IncompatibleVersion),
            1003 => Ok(ErrorCode::InvalidRoom),
            1004 => Ok(ErrorCode::InvalidName),
            1005 => Ok(ErrorCode::LoginTimeout),
            1006 => Ok(ErrorCode::MalformedFrame),
            1500 => Ok(ErrorCode::Internal),
            _ => Err("Invalid error code"),
        }
    }
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Join a room. Must be the first frame on a connection.
    #[serde(rename = "login")]
    Login {
        /// Protocol version spoken by the client.
        version: Version,
        /// Room key.
        room: String,
        /// Display name shown to the other participants.
        #[serde(rename = "userName")]
        user_name: String,
    },

    /// Say something to everyone else in the room.
    #[serde(rename = "chat")]
    Chat {
        /// Message text.
        text: String,
    },
}

impl ClientFrame {
    /// Create a Login frame for the current protocol version.
    #[must_use]
    pub fn login(room: impl Into<String>, user_name: impl Into<String>) -> Self {
        ClientFrame::Login {
            version: PROTOCOL_VERSION,
            room: room.into(),
            user_name: user_name.into(),
        }
    }

    /// Create a Chat frame.
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        ClientFrame::Chat { text: text.into() }
    }

    /// Short frame name for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Login { .. } => "login",
            ClientFrame::Chat { .. } => "chat",
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Login accepted.
    #[serde(rename = "welcome")]
    Welcome {
        /// Identity of this connection inside its room.
        #[serde(rename = "participantId")]
        participant_id: u64,
        /// Negotiated protocol version.
        version: Version,
        /// Room heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Chat text from another participant.
    #[serde(rename = "chat")]
    Chat {
        /// Message text.
        text: String,
        /// Display name of the sender.
        #[serde(rename = "userName")]
        user_name: String,
    },

    /// Room heartbeat.
    #[serde(rename = "tick")]
    Tick {
        /// Room-wide counter, starting at 1 for the first heartbeat.
        tick: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },
}

impl ServerFrame {
    /// Create a Welcome frame carrying the version settled on at login.
    #[must_use]
    pub fn welcome(participant_id: u64, version: Version, heartbeat: u32) -> Self {
        ServerFrame::Welcome {
            participant_id,
            version,
            heartbeat,
        }
    }

    /// Create a Chat frame.
    #[must_use]
    pub fn chat(text: impl Into<String>, user_name: impl Into<String>) -> Self {
        ServerFrame::Chat {
            text: text.into(),
            user_name: user_name.into(),
        }
    }

    /// Create a Tick frame.
    #[must_use]
    pub fn tick(tick: u64) -> Self {
        ServerFrame::Tick { tick }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Short frame name for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Welcome { .. } => "welcome",
            ServerFrame::Chat { .. } => "chat",
            ServerFrame::Tick { .. } => "tick",
            ServerFrame::Error { .. } => "error",
        }
    }
}
