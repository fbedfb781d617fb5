//! Room registry.
//!
//! The registry is the single owner of the room-key → room table. It is an
//! actor like the rooms it creates, so lookups and creations are serialized
//! by its mailbox: two logins racing for the same new key still end up in
//! the same room.
//!
//! Rooms are supervised children of the registry. When one stops, for
//! whatever reason, its termination notice removes it from both directions of
//! the table. Rooms are never restarted; the next login under that key gets a
//! fresh room.

use crate::ids::RoomId;
use crate::room::{ChatRoom, RoomConfig, RoomHandle};
use crate::supervise::{spawn_supervised, Exit};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry has shut down.
    #[error("Registry closed")]
    Closed,
}

/// Registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Rooms currently mapped.
    pub room_count: usize,
    /// Rooms created since startup.
    pub rooms_created: u64,
}

pub(crate) enum RegistryMessage {
    GetOrCreate {
        key: String,
        respond_to: oneshot::Sender<RoomHandle>,
    },
    RoomTerminated {
        room_id: RoomId,
        exit: Exit,
    },
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to the [`RoomRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::UnboundedSender<RegistryMessage>,
    room_count: watch::Receiver<usize>,
}

impl RegistryHandle {
    /// Start a registry whose rooms use `config`.
    #[must_use]
    pub fn spawn(config: RoomConfig) -> Self {
        let (registry, handle) = RoomRegistry::new(config);
        tokio::spawn(registry.run());
        handle
    }

    /// Get the live room for `key`, creating it if there is none.
    pub async fn get_or_create(&self, key: impl Into<String>) -> Result<RoomHandle, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetOrCreate {
            key: key.into(),
            respond_to: tx,
        })?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Stats { respond_to: tx })?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Number of mapped rooms, updated as rooms are created and terminate.
    ///
    /// The sender side closes when the registry stops.
    #[must_use]
    pub fn watch_room_count(&self) -> watch::Receiver<usize> {
        self.room_count.clone()
    }

    /// Stop every room and wait for them to terminate, then stop the registry.
    ///
    /// Any number of callers may wait on the same shutdown.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Shutdown { respond_to: tx })?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    fn send(&self, message: RegistryMessage) -> Result<(), RegistryError> {
        self.sender.send(message).map_err(|_| RegistryError::Closed)
    }
}

/// The registry actor.
pub struct RoomRegistry {
    config: RoomConfig,
    receiver: mpsc::UnboundedReceiver<RegistryMessage>,
    mailbox: mpsc::WeakUnboundedSender<RegistryMessage>,
    by_key: HashMap<String, RoomHandle>,
    by_id: HashMap<RoomId, String>,
    rooms_created: u64,
    room_count: watch::Sender<usize>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    shutting_down: bool,
}

impl RoomRegistry {
    /// Create a registry (not started) and its handle.
    #[must_use]
    pub fn new(config: RoomConfig) -> (Self, RegistryHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (room_count, room_count_rx) = watch::channel(0);

        let registry = Self {
            config,
            receiver,
            mailbox: sender.downgrade(),
            by_key: HashMap::new(),
            by_id: HashMap::new(),
            rooms_created: 0,
            room_count,
            shutdown_waiters: Vec::new(),
            shutting_down: false,
        };

        let handle = RegistryHandle {
            sender,
            room_count: room_count_rx,
        };

        (registry, handle)
    }

    /// Run the registry until shutdown completes or every handle is dropped.
    pub async fn run(mut self) {
        info!(heartbeat = ?self.config.heartbeat_interval, "Room registry started");

        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message);

            if self.shutting_down && self.by_id.is_empty() {
                for done in self.shutdown_waiters.drain(..) {
                    let _ = done.send(());
                }
                break;
            }
        }

        info!(
            rooms_remaining = self.by_id.len(),
            rooms_created = self.rooms_created,
            "Room registry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreate { key, respond_to } => {
                if self.shutting_down {
                    debug!(room = %key, "Refusing room lookup during shutdown");
                    return;
                }
                let _ = respond_to.send(self.get_or_create(key));
            }

            RegistryMessage::RoomTerminated { room_id, exit } => {
                self.room_terminated(room_id, exit);
            }

            RegistryMessage::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }

            RegistryMessage::Shutdown { respond_to } => {
                if !self.shutting_down {
                    info!(rooms = self.by_key.len(), "Shutting down all rooms");
                    for room in self.by_key.values() {
                        room.stop();
                    }
                    self.shutting_down = true;
                }
                self.shutdown_waiters.push(respond_to);
            }
        }
    }

    fn get_or_create(&mut self, key: String) -> RoomHandle {
        if let Some(room) = self.by_key.get(&key) {
            if !room.is_closed() {
                return room.clone();
            }
            // Terminating; its notice has not reached us yet.
            debug!(room = %key, room_id = %room.id(), "Replacing closing room");
        }

        let (room, handle) = ChatRoom::new(key.as_str(), self.config.clone());
        self.start_room(key, handle, room.run())
    }

    /// Supervise `run` as the room behind `handle` and map it under `key`.
    fn start_room<F>(&mut self, key: String, handle: RoomHandle, run: F) -> RoomHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let room_id = handle.id();
        spawn_supervised(run, self.mailbox.clone(), move |exit| {
            RegistryMessage::RoomTerminated { room_id, exit }
        });

        self.by_key.insert(key.clone(), handle.clone());
        self.by_id.insert(room_id, key);
        self.rooms_created += 1;
        self.room_count.send_replace(self.by_key.len());

        info!(
            room = %handle.key(),
            room_id = %room_id,
            rooms = self.by_key.len(),
            "Chat room created"
        );

        handle
    }

    fn room_terminated(&mut self, room_id: RoomId, exit: Exit) {
        let Some(key) = self.by_id.remove(&room_id) else {
            trace!(room_id = %room_id, "Termination notice for unknown room");
            return;
        };

        // The key may already point at a replacement instance.
        if self.by_key.get(&key).is_some_and(|room| room.id() == room_id) {
            self.by_key.remove(&key);
            self.room_count.send_replace(self.by_key.len());
        }

        match exit {
            Exit::Completed => info!(room = %key, room_id = %room_id, "Chat room terminated"),
            Exit::Panicked => {
                error!(room = %key, room_id = %room_id, "Chat room crashed, not restarting")
            }
            Exit::Cancelled => warn!(room = %key, room_id = %room_id, "Chat room aborted"),
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.by_key.len(),
            rooms_created: self.rooms_created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerFrame;
    use std::time::Duration;
    use tokio::time::sleep;

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_same_room() {
        let registry = RegistryHandle::spawn(RoomConfig::default());

        let first = registry.get_or_create("Legendary").await.unwrap();
        let second = registry.get_or_create("Legendary").await.unwrap();
        let other = registry.get_or_create("MetaGames").await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_ne!(first.id(), other.id());
        assert_eq!(registry.stats().await.unwrap().room_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_create_one_room() {
        let registry = RegistryHandle::spawn(RoomConfig::default());

        let (a, b, c) = tokio::join!(
            registry.get_or_create("Legendary"),
            registry.get_or_create("Legendary"),
            registry.get_or_create("Legendary"),
        );

        let a = a.unwrap();
        assert_eq!(a.id(), b.unwrap().id());
        assert_eq!(a.id(), c.unwrap().id());
        assert_eq!(registry.stats().await.unwrap().rooms_created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_room_is_forgotten_and_recreated_fresh() {
        let registry = RegistryHandle::spawn(RoomConfig::default());

        let room = registry.get_or_create("Legendary").await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel::<ServerFrame>();
        let joined = room.join("Alice", Box::new(tx)).await.unwrap();

        sleep(Duration::from_secs(31)).await;
        assert_eq!(room.snapshot().await.unwrap().tick, 1);

        joined.sink_token.cancel();
        settle().await;
        assert_eq!(registry.stats().await.unwrap().room_count, 0);

        let fresh = registry.get_or_create("Legendary").await.unwrap();
        assert_ne!(fresh.id(), room.id());
        let snapshot = fresh.snapshot().await.unwrap();
        assert_eq!(snapshot.tick, 0);
        assert!(snapshot.participants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_room_is_removed() {
        let (mut registry, _handle) = RoomRegistry::new(RoomConfig::default());

        let room = registry.get_or_create("Legendary".to_string());
        registry.room_terminated(room.id(), Exit::Panicked);

        assert_eq!(registry.stats().room_count, 0);
        assert!(registry.by_id.is_empty());

        // Unknown and repeated notices are no-ops.
        registry.room_terminated(room.id(), Exit::Panicked);
        registry.room_terminated(RoomId::next(), Exit::Completed);
        assert_eq!(registry.stats().rooms_created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_room_is_reported_and_removed() {
        let (mut registry, handle) = RoomRegistry::new(RoomConfig::default());
        let mut room_count = handle.watch_room_count();

        let (room, crashing) = ChatRoom::new("Legendary", RoomConfig::default());
        let crashing = registry.start_room(
            "Legendary".to_string(),
            crashing,
            async move {
                let _room = room;
                panic!("room crashed");
            },
        );
        assert_eq!(*room_count.borrow_and_update(), 1);
        tokio::spawn(registry.run());

        room_count.wait_for(|count| *count == 0).await.unwrap();
        assert!(crashing.is_closed());

        let fresh = handle.get_or_create("Legendary").await.unwrap();
        assert_ne!(fresh.id(), crashing.id());
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.room_count, 1);
        assert_eq!(stats.rooms_created, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_count_follows_last_departure() {
        let registry = RegistryHandle::spawn(RoomConfig::default());
        let mut room_count = registry.watch_room_count();
        assert_eq!(*room_count.borrow_and_update(), 0);

        let room = registry.get_or_create("Legendary").await.unwrap();
        assert_eq!(*room_count.borrow_and_update(), 1);

        let (tx, _rx) = mpsc::unbounded_channel::<ServerFrame>();
        let joined = room.join("Alice", Box::new(tx)).await.unwrap();
        joined.sink_token.cancel();

        room_count.changed().await.unwrap();
        assert_eq!(*room_count.borrow_and_update(), 0);
        assert_eq!(registry.stats().await.unwrap().room_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_notice_keeps_replacement() {
        let (mut registry, _handle) = RoomRegistry::new(RoomConfig::default());

        let old = registry.get_or_create("Legendary".to_string());
        old.stop();
        settle().await;
        assert!(old.is_closed());

        let replacement = registry.get_or_create("Legendary".to_string());
        assert_ne!(replacement.id(), old.id());

        registry.room_terminated(old.id(), Exit::Completed);
        let current = registry.get_or_create("Legendary".to_string());
        assert_eq!(current.id(), replacement.id());
        assert_eq!(registry.stats().room_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_rooms() {
        let registry = RegistryHandle::spawn(RoomConfig::default());

        let legendary = registry.get_or_create("Legendary").await.unwrap();
        let meta = registry.get_or_create("MetaGames").await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel::<ServerFrame>();
        let joined = legendary.join("Alice", Box::new(tx)).await.unwrap();

        registry.shutdown().await.unwrap();

        assert!(legendary.is_closed());
        assert!(meta.is_closed());
        assert!(joined.sink_token.is_cancelled());
        assert!(matches!(
            registry.get_or_create("Legendary").await,
            Err(RegistryError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_shutdowns_all_complete() {
        let registry = RegistryHandle::spawn(RoomConfig::default());
        let room = registry.get_or_create("Legendary").await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel::<ServerFrame>();
        let _joined = room.join("Alice", Box::new(tx)).await.unwrap();

        let (first, second) = tokio::join!(registry.shutdown(), registry.shutdown());

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(room.is_closed());
        assert!(registry.shutdown().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_no_rooms() {
        let registry = RegistryHandle::spawn(RoomConfig::default());
        registry.shutdown().await.unwrap();
        assert!(registry.stats().await.is_err());
    }
}
