use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Monotonic clock anchored at the moment playback started.
///
/// Backed by the tokio clock, so paused test time drives it as well.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    origin: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// The instant `offset` after the origin. Offsets past what the clock can
    /// represent land on a far-future deadline instead.
    pub fn at(&self, offset: Duration) -> Instant {
        self.origin
            .checked_add(offset)
            .or_else(|| self.origin.checked_add(FAR_FUTURE))
            .unwrap_or(self.origin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent<T> {
    pub offset: Duration,
    pub payload: T,
}

/// Time-ordered list of events relative to a clock origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule<T> {
    events: Vec<ScheduledEvent<T>>,
    total: Duration,
}

impl<T> Schedule<T> {
    /// Spreads `items` evenly over `total`: item `i` fires at `i * total / len`.
    pub fn uniform(items: impl IntoIterator<Item = T>, total: Duration) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let count = u32::try_from(items.len()).unwrap_or(u32::MAX).max(1);
        let step = total / count;

        let events = items
            .into_iter()
            .zip(0_u32..)
            .map(|(payload, index)| ScheduledEvent {
                offset: step * index,
                payload,
            })
            .collect();

        Self { events, total }
    }

    pub fn events(&self) -> &[ScheduledEvent<T>] {
        &self.events
    }

    /// Offset at which the schedule is complete.
    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Cancelable timed task.
///
/// Waiting is cooperative: other tasks on the same runtime keep running while
/// a task waits, and cancellation wakes every pending wait immediately.
#[derive(Debug, Clone)]
pub struct TimedTask {
    id: u64,
    token: CancellationToken,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TimedTask {
    pub fn new() -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    /// Identifier shared by every clone of this task.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until `deadline`.
    ///
    /// Returns `false` if the task was cancelled before or while waiting.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        if self.is_cancelled() {
            return false;
        }

        if deadline <= Instant::now() {
            return true;
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => !self.is_cancelled(),
        }
    }
}

impl Default for TimedTask {
    fn default() -> Self {
        Self::new()
    }
}
