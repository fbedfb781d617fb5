//! Process-unique identities for rooms and participants.
//!
//! A room key names a room; a [`RoomId`] names one *instance* of it. When a
//! room empties and is later re-created under the same key, the new instance
//! gets a new id, which is what lets termination notices for the old instance
//! be told apart from the live one.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ROOM_COUNTER: AtomicU64 = AtomicU64::new(1);
static PARTICIPANT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one room instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomId(u64);

impl RoomId {
    /// Allocate the next room id.
    #[must_use]
    pub fn next() -> Self {
        Self(ROOM_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room#{}", self.0)
    }
}

/// Identity of one joined connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Allocate the next participant id.
    #[must_use]
    pub fn next() -> Self {
        Self(PARTICIPANT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids() {
        assert_ne!(RoomId::next(), RoomId::next());
        assert_ne!(ParticipantId::next(), ParticipantId::next());
    }

    #[test]
    fn test_display() {
        let id = ParticipantId::next();
        assert_eq!(id.to_string(), format!("participant#{}", id.get()));
    }
}
