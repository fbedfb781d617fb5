//! # huddle-core
//!
//! Rooms, registry and delivery actors for the Huddle chat server.
//!
//! Every stateful unit is an actor: a task that owns its state and a mailbox,
//! driven through a cloneable handle.
//!
//! - **Registry** - maps room keys to live rooms, creates them on demand
//! - **Room** - membership, chat fan-out and the heartbeat tick
//! - **Sink** - writes one participant's events to its connection
//! - **Service** - login and chat entry points for transports
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌────────────┐
//! │  Transport  │────▶│ ChatService  │────▶│  Registry   │────▶│  ChatRoom  │
//! └─────────────┘     └──────────────┘     └─────────────┘     └────────────┘
//!        ▲                                        ▲ exit              │ ▲
//!        │                                        └───────────────────┘ │ exit
//!        │                 ┌────────────┐                               │
//!        └─────────────────│ ClientSink │◀──────────────────────────────┘
//!                          └────────────┘
//! ```
//!
//! Children are supervised: when a sink stops its room hears about it, and
//! when a room stops the registry hears about it. Nothing is restarted.

pub mod ids;
pub mod registry;
pub mod room;
pub mod schedule;
pub mod service;
pub mod sink;
pub mod supervise;

pub use ids::{ParticipantId, RoomId};
pub use registry::{RegistryError, RegistryHandle, RegistryStats, RoomRegistry};
pub use room::{
    ChatRoom, Joined, ParticipantInfo, RoomConfig, RoomError, RoomHandle, RoomSnapshot, RoomState,
    DEFAULT_HEARTBEAT_INTERVAL,
};
pub use schedule::{schedule_repeating, Schedule};
pub use service::{
    validate_room_key, validate_user_name, ChatError, ChatService, Participant,
    MAX_ROOM_KEY_LENGTH, MAX_USER_NAME_LENGTH,
};
pub use sink::{ClientSink, EventWriter, SinkError, SinkHandle};
pub use supervise::{spawn_supervised, Exit};
