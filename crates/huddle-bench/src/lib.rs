//! Shared helpers for the Huddle benchmarks.

use async_trait::async_trait;
use huddle_core::{ChatError, ChatService, EventWriter, Participant, SinkError};
use huddle_protocol::ServerFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts delivered events across every writer sharing it.
#[derive(Debug, Default)]
pub struct DeliveryCounter {
    delivered: AtomicU64,
    notify: Notify,
}

impl DeliveryCounter {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Wait until at least `target` events have been delivered.
    pub async fn wait_for(&self, target: u64) {
        while self.get() < target {
            self.notify.notified().await;
        }
    }

    /// A writer that discards events after counting them.
    #[must_use]
    pub fn writer(self: &Arc<Self>) -> CountingWriter {
        CountingWriter {
            counter: Arc::clone(self),
        }
    }
}

/// [`EventWriter`] that only counts.
#[derive(Debug)]
pub struct CountingWriter {
    counter: Arc<DeliveryCounter>,
}

#[async_trait]
impl EventWriter for CountingWriter {
    async fn write(&mut self, _event: &ServerFrame) -> Result<(), SinkError> {
        self.counter.delivered.fetch_add(1, Ordering::AcqRel);
        self.counter.notify.notify_one();
        Ok(())
    }
}

/// Log `size` participants into `room`, all counting into `counter`.
///
/// # Errors
///
/// Returns an error if any login fails.
pub async fn populate_room(
    service: &ChatService,
    room: &str,
    size: usize,
    counter: &Arc<DeliveryCounter>,
) -> Result<Vec<Participant>, ChatError> {
    let mut participants = Vec::with_capacity(size);
    for i in 0..size {
        let name = format!("user-{i}");
        participants.push(service.login_and_join(room, &name, counter.writer()).await?);
    }
    Ok(participants)
}
