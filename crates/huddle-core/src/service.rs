//! The chat service: what a transport talks to.
//!
//! A transport accepts a connection, reads its login, and calls
//! [`ChatService::login_and_join`] with a writer for the connection's outbound
//! half. Everything after that goes through the returned [`Participant`].
//!
//! Build one `ChatService` at startup and share it; it owns the registry.

use crate::ids::ParticipantId;
use crate::registry::{RegistryError, RegistryHandle, RegistryStats};
use crate::room::{JoinError, RoomConfig, RoomError, RoomHandle};
use crate::sink::EventWriter;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum room key length in bytes.
pub const MAX_ROOM_KEY_LENGTH: usize = 256;

/// Maximum display name length in bytes.
pub const MAX_USER_NAME_LENGTH: usize = 64;

/// How many times a login resolves the room again after landing on one that
/// was already closing.
const JOIN_ATTEMPTS: usize = 3;

/// Service errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid room key.
    #[error("Invalid room key: {0}")]
    InvalidRoomKey(&'static str),

    /// Invalid display name.
    #[error("Invalid user name: {0}")]
    InvalidUserName(&'static str),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Validate a room key.
///
/// Keys are opaque: anything printable goes, including `/`, `+` and `=`.
///
/// # Errors
///
/// Returns an error message if the key is invalid.
pub fn validate_room_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("Room key cannot be empty");
    }
    if key.len() > MAX_ROOM_KEY_LENGTH {
        return Err("Room key too long");
    }
    if key.chars().any(char::is_control) {
        return Err("Room key contains control characters");
    }
    Ok(())
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_user_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("User name cannot be blank");
    }
    if name.len() > MAX_USER_NAME_LENGTH {
        return Err("User name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("User name contains control characters");
    }
    Ok(())
}

/// A joined connection.
///
/// Dropping a `Participant` does not disconnect it; call
/// [`Participant::disconnect`] or let the transport writer fail.
#[derive(Debug, Clone)]
pub struct Participant {
    id: ParticipantId,
    user_name: String,
    room: RoomHandle,
    sink_token: CancellationToken,
}

impl Participant {
    /// Identity inside the room.
    #[must_use]
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// The room this participant joined.
    #[must_use]
    pub fn room(&self) -> &RoomHandle {
        &self.room
    }

    /// Say something to the rest of the room. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns an error if the room is gone.
    pub fn send_chat(&self, text: impl Into<String>) -> Result<(), ChatError> {
        Ok(self.room.chat(self.id, text)?)
    }

    /// Leave the room. Idempotent, and equivalent to the transport failing.
    pub fn disconnect(&self) {
        self.sink_token.cancel();
    }

    /// Whether this participant has left, by either path.
    #[must_use]
    pub fn is_departed(&self) -> bool {
        self.sink_token.is_cancelled()
    }

    /// Resolves once the participant has left, by either path.
    pub async fn departed(&self) {
        self.sink_token.cancelled().await;
    }
}

/// Entry point for transports.
#[derive(Debug, Clone)]
pub struct ChatService {
    registry: RegistryHandle,
    config: RoomConfig,
}

impl ChatService {
    /// Start the service and its room registry.
    #[must_use]
    pub fn new(config: RoomConfig) -> Self {
        info!(heartbeat = ?config.heartbeat_interval, "Starting chat service");
        Self {
            registry: RegistryHandle::spawn(config.clone()),
            config,
        }
    }

    /// Interval between room heartbeats.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// Resolve or create `room_key` and join it as `user_name`.
    ///
    /// Events for the participant are written to `writer` until it fails or
    /// the participant disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or name is invalid, or the service is
    /// shutting down.
    pub async fn login_and_join<W: EventWriter>(
        &self,
        room_key: &str,
        user_name: &str,
        writer: W,
    ) -> Result<Participant, ChatError> {
        validate_room_key(room_key).map_err(ChatError::InvalidRoomKey)?;
        validate_user_name(user_name).map_err(ChatError::InvalidUserName)?;

        let mut writer: Box<dyn EventWriter> = Box::new(writer);

        for attempt in 1..=JOIN_ATTEMPTS {
            let room = self.registry.get_or_create(room_key).await?;

            match room.try_join(user_name.to_string(), writer).await {
                Ok(joined) => {
                    return Ok(Participant {
                        id: joined.participant,
                        user_name: user_name.to_string(),
                        room,
                        sink_token: joined.sink_token,
                    });
                }
                Err(JoinError::Refused(returned)) => {
                    debug!(
                        room = %room_key,
                        room_id = %room.id(),
                        attempt,
                        "Room closed under login, resolving again"
                    );
                    writer = returned;
                }
                Err(JoinError::Closed) => break,
            }
        }

        Err(RoomError::Closed.into())
    }

    /// Say something on behalf of `participant`.
    ///
    /// # Errors
    ///
    /// Returns an error if the room is gone.
    pub fn send_chat(&self, participant: &Participant, text: impl Into<String>) -> Result<(), ChatError> {
        participant.send_chat(text)
    }

    /// Disconnect `participant`. Idempotent.
    pub fn disconnect(&self, participant: &Participant) {
        participant.disconnect();
    }

    /// Registry statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry has shut down.
    pub async fn stats(&self) -> Result<RegistryStats, ChatError> {
        Ok(self.registry.stats().await?)
    }

    /// Live room count, for gauges that must not poll.
    #[must_use]
    pub fn watch_room_count(&self) -> watch::Receiver<usize> {
        self.registry.watch_room_count()
    }

    /// Stop every room and the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry has already shut down.
    pub async fn shutdown(&self) -> Result<(), ChatError> {
        Ok(self.registry.shutdown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerFrame;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    async fn login(
        service: &ChatService,
        room: &str,
        name: &str,
    ) -> (Participant, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = service.login_and_join(room, name, tx).await.unwrap();
        (participant, rx)
    }

    #[test]
    fn test_room_key_validation() {
        assert!(validate_room_key("Legendary").is_ok());
        assert!(validate_room_key("q8Zk+/w1Rcu4SxX0tFzK9w==").is_ok());
        assert!(validate_room_key("").is_err());
        assert!(validate_room_key("bad\nkey").is_err());
        assert!(validate_room_key(&"a".repeat(MAX_ROOM_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_user_name_validation() {
        assert!(validate_user_name("Alice").is_ok());
        assert!(validate_user_name("   ").is_err());
        assert!(validate_user_name(&"a".repeat(MAX_USER_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_login_rejected() {
        let service = ChatService::new(RoomConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            service.login_and_join("", "Alice", tx.clone()).await,
            Err(ChatError::InvalidRoomKey(_))
        ));
        assert!(matches!(
            service.login_and_join("Legendary", "", tx).await,
            Err(ChatError::InvalidUserName(_))
        ));
        assert_eq!(service.stats().await.unwrap().rooms_created, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let service = ChatService::new(RoomConfig::default());
        let (alice, _a) = login(&service, "Legendary", "Alice").await;
        let (bob, _b) = login(&service, "Legendary", "Bob").await;

        service.disconnect(&alice);
        alice.disconnect();
        sleep(Duration::from_millis(1)).await;

        assert!(alice.is_departed());
        let snapshot = bob.room().snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].id, bob.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_lands_in_fresh_room_after_race_with_closing_room() {
        let service = ChatService::new(RoomConfig::default());
        let (alice, _a) = login(&service, "Legendary", "Alice").await;
        let old_room = alice.room().id();

        // Alice leaves and Bob logs in without giving the room time to settle.
        alice.disconnect();
        let (bob, mut bob_rx) = login(&service, "Legendary", "Bob").await;
        sleep(Duration::from_millis(1)).await;

        let snapshot = bob.room().snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].user_name, "Bob");

        assert_ne!(bob.room().id(), old_room);
        assert!(alice.room().is_closed());
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.rooms_created, 2);
        assert_eq!(stats.room_count, 1);

        sleep(Duration::from_secs(31)).await;
        assert_eq!(bob_rx.try_recv(), Ok(ServerFrame::tick(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_resolves_on_transport_failure() {
        let service = ChatService::new(RoomConfig::default());
        let (alice, _a) = login(&service, "Legendary", "Alice").await;
        let (bob, bob_rx) = login(&service, "Legendary", "Bob").await;

        drop(bob_rx);
        service.send_chat(&alice, "Hello").unwrap();

        tokio::time::timeout(Duration::from_secs(1), bob.departed())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_everyone() {
        let service = ChatService::new(RoomConfig::default());
        let (alice, _a) = login(&service, "Legendary", "Alice").await;
        let (stranger, _s) = login(&service, "MetaGames", "Stranger").await;

        service.shutdown().await.unwrap();

        assert!(alice.is_departed());
        assert!(stranger.is_departed());
        assert!(alice.send_chat("anyone?").is_err());
    }
}
