use super::{Delay, lock};
use crate::error::{Error, ErrorSpec};
use async_std::task::sleep;
use log::debug;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

struct TimerState<E> {
    settled: bool,
    /// `None` when the delay is too large to represent; such a timer never fires.
    deadline: Option<Instant>,
    delay: Option<Delay>,
    spec: Option<ErrorSpec<E>>,
}

/// A future that yields an error once its delay elapses, unless cancelled first.
///
/// A timer settles exactly once: either it fires, producing the error described
/// by its [`ErrorSpec`], or it is cancelled. A cancelled timer never completes, so
/// it is meant to be raced against another future rather than awaited alone.
///
/// Created with [`timer`].
pub struct Timer<E> {
    state: Arc<Mutex<TimerState<E>>>,
}

/// A cloneable handle that cancels a [`Timer`] while the timer itself is being polled elsewhere.
pub struct TimerHandle<E> {
    state: Arc<Mutex<TimerState<E>>>,
}

/// Creates a [`Timer`] that fires after `delay`.
///
/// The clock starts when the timer is created, not when it is first polled.
/// A delay too large to add to the current instant (such as `Duration::MAX`)
/// yields a timer that never fires.
///
/// # Arguments
/// * `delay` - How long to wait before firing.
/// * `spec` - The error to produce when firing: an [`ErrorSpec`], or a message
///   (`&str` / `String`) wrapped into [`Error::Timeout`].
///
/// # Example
/// ```rust
/// use async_std::task::block_on;
/// use settle_rs::asynchronous::timer;
/// use settle_rs::error::{BoxError, ErrorSpec};
/// use std::time::Duration;
///
/// let error: BoxError = block_on(timer(Duration::from_millis(10), "too slow"));
/// assert_eq!(error.to_string(), "too slow");
///
/// let cancelled = timer::<BoxError>(Duration::from_millis(10), ErrorSpec::default());
/// cancelled.cancel();
/// assert!(cancelled.is_settled());
/// ```
pub fn timer<E>(delay: Duration, spec: impl Into<ErrorSpec<E>>) -> Timer<E> {
    Timer {
        state: Arc::new(Mutex::new(TimerState {
            settled: false,
            deadline: Instant::now().checked_add(delay),
            delay: None,
            spec: Some(spec.into()),
        })),
    }
}

impl<E> Timer<E> {
    /// Cancels the timer.
    ///
    /// The pending delay and the error description are dropped, so an error
    /// factory is never invoked. Does nothing if the timer already fired or
    /// was already cancelled.
    pub fn cancel(&self) {
        cancel(&self.state);
    }

    pub fn handle(&self) -> TimerHandle<E> {
        TimerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns `true` once the timer has fired or been cancelled.
    pub fn is_settled(&self) -> bool {
        lock(&self.state).settled
    }
}

impl<E> TimerHandle<E> {
    /// Cancels the timer this handle was obtained from. See [`Timer::cancel`].
    pub fn cancel(&self) {
        cancel(&self.state);
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.state).settled
    }
}

impl<E> Clone for TimerHandle<E> {
    fn clone(&self) -> Self {
        TimerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

fn cancel<E>(state: &Mutex<TimerState<E>>) {
    let mut state = lock(state);
    if state.settled {
        return;
    }
    state.settled = true;
    state.delay = None;
    state.spec = None;
    debug!("Timer cancelled before firing");
}

impl<E> Future for Timer<E>
where
    E: From<Error>,
{
    type Output = E;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<E> {
        let mut state = lock(&self.state);
        if state.settled {
            return Poll::Pending;
        }

        let Some(deadline) = state.deadline else {
            return Poll::Pending;
        };
        let delay = state.delay.get_or_insert_with(|| -> Delay {
            Box::pin(sleep(deadline.saturating_duration_since(Instant::now())))
        });
        if delay.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        state.settled = true;
        state.delay = None;
        let spec = state.spec.take().unwrap_or_default();
        drop(state);

        debug!("Timer fired");
        Poll::Ready(spec.resolve())
    }
}

impl<E> fmt::Debug for Timer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Timer")
            .field("settled", &state.settled)
            .field("deadline", &state.deadline)
            .finish()
    }
}

impl<E> fmt::Debug for TimerHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("settled", &self.is_settled())
            .finish()
    }
}
