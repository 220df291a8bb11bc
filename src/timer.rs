use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

/// Timer state. One lock serializes every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed { deadline: Instant },
    Paused,
    Completed,
}

/// A one-shot inactivity timer: `idled()` completes once no `poke` has
/// arrived for the configured window. Used to reap idle connections.
///
/// Once completed it stays completed: `poke`, `pause`, `resume` and
/// `set_timeout` all become no-ops returning `false`.
#[derive(Clone)]
pub struct IdleTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    state: Mutex<(TimerState, Duration)>,
    changed: Notify,
}

impl IdleTimer {
    /// An armed timer that completes after `timeout` of inactivity.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                state: Mutex::new((
                    TimerState::Armed { deadline: Instant::now() + timeout },
                    timeout,
                )),
                changed: Notify::new(),
            }),
        }
    }

    /// Record activity, pushing the deadline out. `false` once completed.
    pub fn poke(&self) -> bool {
        let mut guard = self.inner.state.lock();
        match guard.0 {
            TimerState::Completed => false,
            TimerState::Paused => true,
            TimerState::Armed { .. } => {
                guard.0 = TimerState::Armed { deadline: Instant::now() + guard.1 };
                drop(guard);
                self.inner.changed.notify_waiters();
                true
            }
        }
    }

    /// Suspend the countdown. `false` once completed.
    pub fn pause(&self) -> bool {
        let mut guard = self.inner.state.lock();
        match guard.0 {
            TimerState::Completed => false,
            _ => {
                guard.0 = TimerState::Paused;
                drop(guard);
                self.inner.changed.notify_waiters();
                true
            }
        }
    }

    /// Re-arm from paused (or restart the window if already armed).
    /// `false` once completed.
    pub fn resume(&self) -> bool {
        let mut guard = self.inner.state.lock();
        match guard.0 {
            TimerState::Completed => false,
            _ => {
                guard.0 = TimerState::Armed { deadline: Instant::now() + guard.1 };
                drop(guard);
                self.inner.changed.notify_waiters();
                true
            }
        }
    }

    /// Change the inactivity window; takes effect from now when armed.
    /// `false` once completed.
    pub fn set_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.inner.state.lock();
        match guard.0 {
            TimerState::Completed => false,
            state => {
                guard.1 = timeout;
                if matches!(state, TimerState::Armed { .. }) {
                    guard.0 = TimerState::Armed { deadline: Instant::now() + timeout };
                }
                drop(guard);
                self.inner.changed.notify_waiters();
                true
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.inner.state.lock().0, TimerState::Completed)
    }

    /// Wait until the timer fires. Completes immediately if it already
    /// has; never completes while paused (until resumed).
    pub async fn idled(&self) {
        loop {
            let wait_until = {
                let guard = self.inner.state.lock();
                match guard.0 {
                    TimerState::Completed => return,
                    TimerState::Paused => None,
                    TimerState::Armed { deadline } => Some(deadline),
                }
            };

            match wait_until {
                None => self.inner.changed.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline.into()) => {
                            let mut guard = self.inner.state.lock();
                            if let TimerState::Armed { deadline } = guard.0 {
                                if Instant::now() >= deadline {
                                    trace!("idle timer completed");
                                    guard.0 = TimerState::Completed;
                                    return;
                                }
                            }
                            // Poked or paused while sleeping; go around.
                        }
                        _ = self.inner.changed.notified() => {}
                    }
                }
            }
        }
    }
}
