//! Cancelable repeating delivery into an actor mailbox.

use std::time::Duration;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle to a repeating schedule.
///
/// Cancelling is idempotent. Dropping the handle cancels the schedule too, so
/// a schedule never outlives the actor that owns it.
#[derive(Debug)]
pub struct Schedule {
    token: CancellationToken,
}

impl Schedule {
    /// Stop the schedule. No further messages are sent after this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if the schedule has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Send `make()` to `target` every `period`, first after one full period.
///
/// The schedule stops on cancellation or once the target mailbox is gone.
pub fn schedule_repeating<M, F>(
    period: Duration,
    target: WeakUnboundedSender<M>,
    mut make: F,
) -> Schedule
where
    M: Send + 'static,
    F: FnMut() -> M + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancelled.cancelled() => break,

                _ = ticker.tick() => {
                    let Some(target) = target.upgrade() else {
                        break;
                    };
                    if target.send(make()).is_err() {
                        break;
                    }
                }
            }
        }

        trace!("Schedule stopped");
    });

    Schedule { token }
}
