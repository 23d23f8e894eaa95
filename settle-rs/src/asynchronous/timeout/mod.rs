use super::timer;
use crate::error::{BoxError, Error, ErrorSpec};
use log::{debug, error, info, warn};
use std::fmt;
use std::future::{Future, poll_fn};
use std::pin::{Pin, pin};
use std::task::Poll;
use std::time::Duration;

/// Cooperative cancellation requested from an operation that ran out of time.
pub type TimeoutHook = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// An operation raced by [`with_timeout`], with an optional timeout hook.
///
/// The hook is the operation's way to learn that nobody is waiting for it any
/// more, so it can abandon whatever work it still has in flight. It is advisory:
/// an error it returns is discarded and never changes the timeout outcome.
///
/// # Example
/// ```rust
/// use async_std::task::{block_on, sleep};
/// use settle_rs::asynchronous::{Operation, with_timeout};
/// use settle_rs::error::BoxError;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// let abandoned = Arc::new(AtomicBool::new(false));
/// let flag = abandoned.clone();
/// let operation = Operation::new(async {
///     sleep(Duration::from_millis(50)).await;
///     Ok::<_, BoxError>("done slowly")
/// })
/// .on_timeout(move || {
///     flag.store(true, Ordering::SeqCst);
///     Ok(())
/// });
///
/// let result = block_on(with_timeout(operation, Duration::from_millis(10), "too slow"));
/// assert_eq!(result.unwrap_err().to_string(), "too slow");
/// assert!(abandoned.load(Ordering::SeqCst));
/// ```
pub struct Operation<F> {
    future: F,
    on_timeout: Option<TimeoutHook>,
}

impl<F: Future> Operation<F> {
    pub fn new(future: F) -> Self {
        Operation {
            future,
            on_timeout: None,
        }
    }

    /// Builds the operation from a factory, which is invoked right away.
    pub fn from_fn<G>(factory: G) -> Self
    where
        G: FnOnce() -> F,
    {
        Operation::new(factory())
    }

    /// Attaches a hook invoked once if the operation times out.
    pub fn on_timeout<H>(mut self, hook: H) -> Self
    where
        H: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.on_timeout = Some(Box::new(hook));
        self
    }

    pub fn has_timeout_hook(&self) -> bool {
        self.on_timeout.is_some()
    }
}

impl<F> fmt::Debug for Operation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("on_timeout", &self.on_timeout.is_some())
            .finish_non_exhaustive()
    }
}

/// Conversion into an [`Operation`].
///
/// Implemented for every future (no timeout hook) and for `Operation` itself.
pub trait IntoOperation {
    type Future: Future;

    fn into_operation(self) -> Operation<Self::Future>;
}

impl<F: Future> IntoOperation for F {
    type Future = F;

    fn into_operation(self) -> Operation<F> {
        Operation::new(self)
    }
}

impl<F: Future> IntoOperation for Operation<F> {
    type Future = F;

    fn into_operation(self) -> Operation<F> {
        self
    }
}

enum Outcome<T, E> {
    Settled(Result<T, E>),
    TimedOut(E),
}

/// Races an asynchronous operation against a [`Timer`](super::Timer).
///
/// Exactly one outcome reaches the caller:
/// - If the operation settles first, the timer is cancelled and the operation's
///   own result is returned, whatever value or error it holds.
/// - If the timer fires first, the operation's timeout hook (if any) is invoked
///   and the timer's error is returned. The operation is dropped.
///
/// # Arguments
/// * `operation` - A future, or an [`Operation`] carrying a timeout hook.
/// * `delay` - The time budget, counted from this call rather than from the
///   first poll of the returned future.
/// * `spec` - The error to produce on timeout; see [`timer`](super::timer).
///
/// # Example
/// ```rust
/// use async_std::task::block_on;
/// use settle_rs::asynchronous::with_timeout;
/// use settle_rs::error::{BoxError, ErrorSpec};
/// use std::future::pending;
/// use std::time::Duration;
///
/// let fast = block_on(with_timeout(
///     async { Ok::<_, BoxError>(0) },
///     Duration::from_millis(20),
///     ErrorSpec::default(),
/// ));
/// assert_eq!(fast.unwrap(), 0);
///
/// let never = block_on(with_timeout(
///     pending::<Result<(), BoxError>>(),
///     Duration::from_millis(20),
///     ErrorSpec::default(),
/// ));
/// assert_eq!(never.unwrap_err().to_string(), "timeout");
/// ```
pub fn with_timeout<O, Fut, T, E>(
    operation: O,
    delay: Duration,
    spec: impl Into<ErrorSpec<E>>,
) -> impl Future<Output = Result<T, E>>
where
    O: IntoOperation<Future = Fut>,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let mut timer = timer::<E>(delay, spec);
    let Operation { future, on_timeout } = operation.into_operation();

    async move {
        let mut future = pin!(future);

        let outcome = poll_fn(|cx| {
            if let Poll::Ready(result) = future.as_mut().poll(cx) {
                return Poll::Ready(Outcome::Settled(result));
            }
            Pin::new(&mut timer).poll(cx).map(Outcome::TimedOut)
        })
        .await;

        match outcome {
            Outcome::Settled(result) => {
                timer.cancel();
                info!("Operation completed before timeout; returning result.");
                result
            }
            Outcome::TimedOut(err) => {
                match on_timeout {
                    Some(hook) => {
                        warn!("Operation timed out after {:?}; invoking timeout hook.", delay);
                        if let Err(hook_err) = hook() {
                            debug!("Timeout hook failed, ignoring: {}", hook_err);
                        }
                    }
                    None => error!("Operation timed out after {:?}; returning error.", delay),
                }
                Err(err)
            }
        }
    }
}
