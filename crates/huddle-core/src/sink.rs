//! Per-connection delivery.
//!
//! A [`ClientSink`] owns the outbound half of one connection. The room pushes
//! events into its mailbox without waiting; the sink writes them out in
//! order. When the sink stops, because the participant disconnected, a write
//! failed, or the room went away, its supervisor tells the room, and that
//! notice is the only way a room learns a participant has left.

use crate::ids::ParticipantId;
use async_trait::async_trait;
use huddle_protocol::ServerFrame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The other end of the connection is gone.
    #[error("Connection closed")]
    Closed,

    /// Writing to the connection failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// The outbound half of a connection.
///
/// Implemented by each transport. An error from `write` ends the sink.
#[async_trait]
pub trait EventWriter: Send + 'static {
    /// Write one event to the connection.
    async fn write(&mut self, event: &ServerFrame) -> Result<(), SinkError>;
}

/// Events forwarded into a channel; fails once the receiver is dropped.
#[async_trait]
impl EventWriter for mpsc::UnboundedSender<ServerFrame> {
    async fn write(&mut self, event: &ServerFrame) -> Result<(), SinkError> {
        self.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Why a sink stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Disconnected,
    WriteFailed,
    RoomGone,
}

/// Handle to a running [`ClientSink`], held by the room.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    participant: ParticipantId,
    sender: mpsc::UnboundedSender<Arc<ServerFrame>>,
    cancel_token: CancellationToken,
}

impl SinkHandle {
    /// The participant this sink delivers to.
    #[must_use]
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Queue an event for delivery. Never waits.
    ///
    /// Returns `false` if the sink has already stopped; its departure notice
    /// is on the way, so the caller can ignore it.
    pub fn deliver(&self, event: Arc<ServerFrame>) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Stop the sink. Safe to call any number of times.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    /// Token cancelled when the sink stops, for whatever reason.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// The sink actor.
pub struct ClientSink {
    participant: ParticipantId,
    user_name: String,
    receiver: mpsc::UnboundedReceiver<Arc<ServerFrame>>,
    cancel_token: CancellationToken,
    writer: Box<dyn EventWriter>,
    delivered: u64,
}

impl ClientSink {
    /// Create a sink (not started) and its handle.
    pub fn new(
        participant: ParticipantId,
        user_name: impl Into<String>,
        writer: Box<dyn EventWriter>,
    ) -> (Self, SinkHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let handle = SinkHandle {
            participant,
            sender,
            cancel_token: cancel_token.clone(),
        };

        let sink = Self {
            participant,
            user_name: user_name.into(),
            receiver,
            cancel_token,
            writer,
            delivered: 0,
        };

        (sink, handle)
    }

    /// Run the delivery loop until disconnect, write failure, or the room
    /// dropping its handle.
    pub async fn run(mut self) {
        trace!(participant = %self.participant, user = %self.user_name, "Sink started");

        let reason = loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break StopReason::Disconnected,

                event = self.receiver.recv() => {
                    let Some(event) = event else {
                        break StopReason::RoomGone;
                    };

                    // A write may stall on a slow peer; disconnect still wins.
                    let written = tokio::select! {
                        biased;
                        () = self.cancel_token.cancelled() => break StopReason::Disconnected,
                        result = self.writer.write(&event) => result,
                    };

                    match written {
                        Ok(()) => self.delivered += 1,
                        Err(e) => {
                            warn!(
                                participant = %self.participant,
                                user = %self.user_name,
                                error = %e,
                                "Delivery failed, closing sink"
                            );
                            break StopReason::WriteFailed;
                        }
                    }
                }
            }
        };

        self.cancel_token.cancel();

        debug!(
            participant = %self.participant,
            user = %self.user_name,
            reason = ?reason,
            delivered = self.delivered,
            "Sink stopped"
        );
    }
}
