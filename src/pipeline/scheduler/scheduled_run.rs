use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// A pending run that fires once after its delay unless cancelled first.
///
/// Firing and cancelling race on a single state transition, so exactly one
/// of them wins. The loser is a no-op.
#[derive(Debug)]
pub struct ScheduledRun<T> {
    captured: T,
    delay: Duration,
    deadline: Instant,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl<T: Clone> ScheduledRun<T> {
    pub fn after(delay: Duration, captured: T) -> Self {
        Self {
            captured,
            delay,
            deadline: Instant::now() + delay,
            state: AtomicU8::new(ARMED),
            cancel: CancellationToken::new(),
        }
    }

    /// Waits for the deadline. Returns the captured value if this run fired,
    /// `None` if it was cancelled first.
    pub async fn fired(&self) -> Option<T> {
        if self.state.load(Ordering::Acquire) == FIRED {
            return Some(self.captured.clone());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = tokio::time::sleep_until(self.deadline) => {
                match self.state.compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) | Err(FIRED) => Some(self.captured.clone()),
                    Err(_) => None,
                }
            }
        }
    }

    /// Returns `true` if this call prevented the run. Cancelling a run that
    /// already fired, or cancelling twice, does nothing.
    pub fn cancel(&self) -> bool {
        let prevented = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if prevented {
            self.cancel.cancel();
        }
        prevented
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
