//! Termination cascade.
//!
//! Every actor in Huddle is the child of the actor that created it: the
//! registry creates rooms, a room creates sinks. [`spawn_supervised`] runs a
//! child on the tokio runtime and guarantees its creator one notification
//! when the child stops, whether it returned, panicked or was aborted.
//!
//! The notification is posted into the parent's own mailbox, so the parent
//! handles it in order with everything else it receives and never polls for
//! liveness.

use std::future::Future;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::{AbortHandle, JoinError};
use tracing::trace;

/// How a supervised child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The child's future ran to completion.
    Completed,
    /// The child panicked.
    Panicked,
    /// The child was aborted before completing.
    Cancelled,
}

impl Exit {
    /// Whether the child stopped for any reason other than returning.
    #[must_use]
    pub fn is_abnormal(self) -> bool {
        !matches!(self, Exit::Completed)
    }
}

impl From<Result<(), JoinError>> for Exit {
    fn from(result: Result<(), JoinError>) -> Self {
        match result {
            Ok(()) => Exit::Completed,
            Err(e) if e.is_panic() => Exit::Panicked,
            Err(_) => Exit::Cancelled,
        }
    }
}

/// Spawn `child` and notify `parent` exactly once when it stops.
///
/// `notify` turns the [`Exit`] into the parent's message type. The parent is
/// held weakly: a child never keeps its creator's mailbox open, and if the
/// creator is already gone the notice is dropped.
pub fn spawn_supervised<F, M, N>(child: F, parent: WeakUnboundedSender<M>, notify: N) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
    M: Send + 'static,
    N: FnOnce(Exit) -> M + Send + 'static,
{
    let handle = tokio::spawn(child);
    let abort = handle.abort_handle();

    tokio::spawn(async move {
        let exit = Exit::from(handle.await);

        match parent.upgrade() {
            Some(parent) => {
                if parent.send(notify(exit)).is_err() {
                    trace!(?exit, "Parent mailbox closed, dropping termination notice");
                }
            }
            None => trace!(?exit, "Parent gone, dropping termination notice"),
        }
    });

    abort
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_completed_child_notifies_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_supervised(async {}, tx.downgrade(), |exit| ("child-1", exit));

        assert_eq!(rx.recv().await, Some(("child-1", Exit::Completed)));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_child_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_supervised(
            async { panic!("room blew up") },
            tx.downgrade(),
            |exit| exit,
        );

        let exit = rx.recv().await.unwrap();
        assert_eq!(exit, Exit::Panicked);
        assert!(exit.is_abnormal());
    }

    #[tokio::test]
    async fn test_aborted_child_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let abort = spawn_supervised(
            tokio::time::sleep(Duration::from_secs(3600)),
            tx.downgrade(),
            |exit| exit,
        );
        abort.abort();

        assert_eq!(rx.recv().await, Some(Exit::Cancelled));
    }

    #[tokio::test]
    async fn test_child_does_not_keep_parent_alive() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Exit>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        spawn_supervised(
            async move {
                let _ = release_rx.await;
            },
            tx.downgrade(),
            |exit| exit,
        );

        // Only the weak reference remains, so the mailbox reports closed.
        drop(tx);
        assert_eq!(rx.recv().await, None);

        let _ = release_tx.send(());
    }
}
