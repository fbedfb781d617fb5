//! # huddle-server
//!
//! WebSocket front end for the Huddle chat rooms.
//!
//! Each connection logs into one room and then exchanges length-prefixed
//! MessagePack frames with it. See [`handlers`] for the connection lifecycle.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
