//! Chat rooms.
//!
//! A [`ChatRoom`] is an actor: it owns its membership and tick counter and
//! processes one [`RoomMessage`] at a time, so joins, chats, heartbeats and
//! departures are totally ordered within a room. Handlers never await another
//! actor; fan-out is a non-blocking push into each member's sink.
//!
//! ```text
//!   Active ──(last member departed / Stop)──▶ Terminating ──▶ Terminated
//! ```

use crate::ids::{ParticipantId, RoomId};
use crate::schedule::{schedule_repeating, Schedule};
use crate::sink::{ClientSink, EventWriter, SinkHandle};
use crate::supervise::{spawn_supervised, Exit};
use huddle_protocol::ServerFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// The room has terminated or is terminating.
    #[error("Room closed")]
    Closed,
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Interval between heartbeat ticks.
    pub heartbeat_interval: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoomState {
    /// Accepting joins and routing events.
    Active,
    /// Cleaning up; queued joins are refused.
    Terminating,
    /// Gone.
    Terminated,
}

/// Messages handled by a room.
pub(crate) enum RoomMessage {
    Join {
        user_name: String,
        writer: Box<dyn EventWriter>,
        respond_to: oneshot::Sender<Result<Joined, Box<dyn EventWriter>>>,
    },
    Chat {
        text: String,
        from: ParticipantId,
    },
    Tick,
    Departed {
        participant: ParticipantId,
        exit: Exit,
    },
    Stop,
    Snapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Why a join did not go through.
pub(crate) enum JoinError {
    /// The room was closing; the writer is handed back untouched.
    Refused(Box<dyn EventWriter>),
    /// The room is gone and took the writer with it.
    Closed,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct Joined {
    /// Identity of the new participant.
    pub participant: ParticipantId,
    /// Cancelling this departs the participant; it is also cancelled when the
    /// sink stops on its own.
    pub sink_token: CancellationToken,
}

/// One member as seen from outside the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub user_name: String,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub key: String,
    pub tick: u64,
    pub state: RoomState,
    /// Members in join order.
    pub participants: Vec<ParticipantInfo>,
}

/// Handle to a [`ChatRoom`].
///
/// Cheap to clone. Holding a handle does not keep a room alive past its own
/// decision to terminate.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    key: Arc<str>,
    sender: mpsc::UnboundedSender<RoomMessage>,
}

impl RoomHandle {
    /// Identity of this room instance.
    #[must_use]
    pub fn id(&self) -> RoomId {
        self.room_id
    }

    /// Room key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the room has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Admit a participant whose outbound events go to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room terminated before the join
    /// was processed.
    pub async fn join(
        &self,
        user_name: impl Into<String>,
        writer: Box<dyn EventWriter>,
    ) -> Result<Joined, RoomError> {
        self.try_join(user_name.into(), writer)
            .await
            .map_err(|_| RoomError::Closed)
    }

    pub(crate) async fn try_join(
        &self,
        user_name: String,
        writer: Box<dyn EventWriter>,
    ) -> Result<Joined, JoinError> {
        let (tx, rx) = oneshot::channel();
        let message = RoomMessage::Join {
            user_name,
            writer,
            respond_to: tx,
        };

        if let Err(mpsc::error::SendError(message)) = self.sender.send(message) {
            return match message {
                RoomMessage::Join { writer, .. } => Err(JoinError::Refused(writer)),
                _ => Err(JoinError::Closed),
            };
        }

        match rx.await {
            Ok(Ok(joined)) => Ok(joined),
            Ok(Err(writer)) => Err(JoinError::Refused(writer)),
            Err(_) => Err(JoinError::Closed),
        }
    }

    /// Queue a chat message from `from`. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room is gone.
    pub fn chat(&self, from: ParticipantId, text: impl Into<String>) -> Result<(), RoomError> {
        self.send(RoomMessage::Chat {
            text: text.into(),
            from,
        })
    }

    /// Ask the room to shut down. No-op if it already has.
    pub fn stop(&self) {
        let _ = self.send(RoomMessage::Stop);
    }

    /// Get the current room state.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the room is gone.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Snapshot { respond_to: tx })?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    fn send(&self, message: RoomMessage) -> Result<(), RoomError> {
        self.sender.send(message).map_err(|_| RoomError::Closed)
    }
}

struct Member {
    user_name: String,
    sink: SinkHandle,
}

/// The room actor.
pub struct ChatRoom {
    room_id: RoomId,
    key: Arc<str>,
    config: RoomConfig,
    receiver: mpsc::UnboundedReceiver<RoomMessage>,
    /// Own mailbox, for the heartbeat and for sink supervision.
    mailbox: mpsc::WeakUnboundedSender<RoomMessage>,
    members: BTreeMap<ParticipantId, Member>,
    tick: u64,
    state: RoomState,
    heartbeat: Option<Schedule>,
}

impl ChatRoom {
    /// Create a room (not started) and its handle.
    pub fn new(key: impl Into<Arc<str>>, config: RoomConfig) -> (Self, RoomHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let room_id = RoomId::next();
        let key = key.into();

        let handle = RoomHandle {
            room_id,
            key: Arc::clone(&key),
            sender: sender.clone(),
        };

        let room = Self {
            room_id,
            key,
            config,
            receiver,
            mailbox: sender.downgrade(),
            members: BTreeMap::new(),
            tick: 0,
            state: RoomState::Active,
            heartbeat: None,
        };

        (room, handle)
    }

    /// Run the room until it terminates.
    #[instrument(skip_all, name = "room", fields(room = %self.key, room_id = %self.room_id))]
    pub async fn run(mut self) {
        info!("Chat room started");
        self.start();

        while self.state == RoomState::Active {
            match self.receiver.recv().await {
                Some(message) => self.handle_message(message),
                None => {
                    debug!("All room handles dropped");
                    break;
                }
            }
        }

        self.terminate();
    }

    fn start(&mut self) {
        self.heartbeat = Some(schedule_repeating(
            self.config.heartbeat_interval,
            self.mailbox.clone(),
            || RoomMessage::Tick,
        ));
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                user_name,
                writer,
                respond_to,
            } => {
                let joined = self.join(user_name, writer);
                if let Err(Ok(joined)) = respond_to.send(Ok(joined)) {
                    // Caller gave up waiting; nobody will ever disconnect this one.
                    joined.sink_token.cancel();
                }
            }

            RoomMessage::Chat { text, from } => self.chat(text, from),

            RoomMessage::Tick => self.next_tick(),

            RoomMessage::Departed { participant, exit } => self.departed(participant, exit),

            RoomMessage::Stop => {
                info!("Stop requested");
                self.stopping();
                for member in self.members.values() {
                    member.sink.disconnect();
                }
                self.state = RoomState::Terminating;
            }

            RoomMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn join(&mut self, user_name: String, writer: Box<dyn EventWriter>) -> Joined {
        let participant = ParticipantId::next();
        let (sink, handle) = ClientSink::new(participant, user_name.clone(), writer);

        spawn_supervised(sink.run(), self.mailbox.clone(), move |exit| {
            RoomMessage::Departed { participant, exit }
        });

        let joined = Joined {
            participant,
            sink_token: handle.token(),
        };

        info!(
            participant = %participant,
            user = %user_name,
            members = self.members.len() + 1,
            "Joined chat room"
        );

        self.members.insert(
            participant,
            Member {
                user_name,
                sink: handle,
            },
        );

        joined
    }

    fn chat(&mut self, text: String, from: ParticipantId) {
        let Some(sender) = self.members.get(&from) else {
            warn!(participant = %from, "Ignoring chat message from non-member");
            return;
        };

        debug!(user = %sender.user_name, text = %text, "Chat");

        let event = Arc::new(ServerFrame::chat(text, sender.user_name.clone()));
        let mut recipients = 0usize;
        for (id, member) in &self.members {
            if *id != from && member.sink.deliver(Arc::clone(&event)) {
                recipients += 1;
            }
        }

        trace!(recipients, "Chat routed");
    }

    fn next_tick(&mut self) {
        if self.members.is_empty() {
            // Created but nobody ever made it in.
            info!("Room abandoned before anyone joined, closing");
            self.stopping();
            self.state = RoomState::Terminating;
            return;
        }

        self.tick += 1;
        debug!(tick = self.tick, members = self.members.len(), "Sending tick");

        let event = Arc::new(ServerFrame::tick(self.tick));
        for member in self.members.values() {
            member.sink.deliver(Arc::clone(&event));
        }
    }

    fn departed(&mut self, participant: ParticipantId, exit: Exit) {
        let Some(member) = self.members.remove(&participant) else {
            trace!(participant = %participant, "Departure for non-member ignored");
            return;
        };

        if exit.is_abnormal() {
            error!(participant = %participant, user = %member.user_name, ?exit, "Sink died");
        }

        info!(
            participant = %participant,
            user = %member.user_name,
            members = self.members.len(),
            "Left chat room"
        );

        if self.members.is_empty() {
            info!("Last user has left, room is closing");
            self.stopping();
            self.state = RoomState::Terminating;
        }
    }

    /// Cancel the heartbeat. Idempotent.
    fn stopping(&mut self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.cancel();
        }
    }

    fn terminate(&mut self) {
        self.state = RoomState::Terminating;
        self.stopping();

        // Refuse anything that raced in behind the final departure.
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                RoomMessage::Join {
                    user_name,
                    writer,
                    respond_to,
                } => {
                    debug!(user = %user_name, "Refusing join, room is closing");
                    let _ = respond_to.send(Err(writer));
                }
                RoomMessage::Snapshot { respond_to } => {
                    let _ = respond_to.send(self.snapshot());
                }
                RoomMessage::Chat { .. }
                | RoomMessage::Tick
                | RoomMessage::Departed { .. }
                | RoomMessage::Stop => {}
            }
        }

        for member in self.members.values() {
            member.sink.disconnect();
        }

        self.heartbeat = None;
        self.state = RoomState::Terminated;
        info!(ticks = self.tick, "Chat room terminated");
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id,
            key: self.key.to_string(),
            tick: self.tick,
            state: self.state,
            participants: self
                .members
                .iter()
                .map(|(id, member)| ParticipantInfo {
                    id: *id,
                    user_name: member.user_name.clone(),
                })
                .collect(),
        }
    }
}
