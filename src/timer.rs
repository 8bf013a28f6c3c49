//! The one-shot timer interface driving the idle-close path
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handle of a scheduled one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Monotonic clock plus one-shot timer scheduling.
///
/// The host marshals timer firings back onto the control thread by calling
/// [`crate::hub::Hub::idle_timer_fired`].
pub trait TimerService {
    /// Monotonic time since an arbitrary epoch.
    fn now(&self) -> Duration;

    /// Arm a one-shot timer.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Disarm a timer. Unknown or already-fired ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

#[derive(Debug, Default)]
struct ClockInner {
    now: Duration,
    next_id: u64,
    armed: Vec<(TimerId, Duration)>,
}

/// A manually advanced [`TimerService`].
///
/// The clock only moves when [`VirtualClock::advance`] is called, which also
/// reports the timers that came due. Handles are cheap clones of the same
/// clock, so a test (or a poll-loop embedder) can keep one while the core
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward, returning the timers that came due in deadline
    /// order.
    pub fn advance(&self, delta: Duration) -> Vec<TimerId> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return Vec::new(),
        };
        inner.now += delta;
        let now = inner.now;

        let mut due: Vec<(TimerId, Duration)> = Vec::new();
        inner.armed.retain(|&(id, deadline)| {
            if deadline <= now {
                due.push((id, deadline));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(_, deadline)| deadline);
        due.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of armed timers.
    pub fn armed(&self) -> usize {
        self.inner.lock().map(|i| i.armed.len()).unwrap_or(0)
    }

    /// Deadline of the next armed timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        let inner = self.inner.lock().ok()?;
        inner.armed.iter().map(|&(_, deadline)| deadline).min()
    }
}

impl TimerService for VirtualClock {
    fn now(&self) -> Duration {
        self.inner.lock().map(|i| i.now).unwrap_or(Duration::ZERO)
    }

    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        let deadline = inner.now + delay;
        inner.armed.push((id, deadline));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.armed.retain(|&(armed_id, _)| armed_id != id);
        }
    }
}
