use super::{Delay, lock};
use crate::config::RetryConfig;
use crate::error::Error;
use crate::strategies::Backoff;
use async_std::task::sleep;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker, ready};
use std::time::Duration;

/// Settlement guard shared between a [`Retry`] and its handles.
///
/// Leaves `Running` at most once; every other state is terminal.
enum SessionState<E> {
    Running,
    /// Cancelled through a handle; the error has not been handed out yet.
    Cancelled(E),
    /// Cancelled without an error; the retry future never completes.
    Abandoned,
    Settled,
}

struct Session<E> {
    state: SessionState<E>,
    waker: Option<Waker>,
}

enum Phase<Fut> {
    Idle,
    Attempt(Pin<Box<Fut>>),
    Backoff(Delay),
    Finished,
}

/// A retry session, created with [`retry`].
///
/// Polling it drives the attempts; it completes with the first successful
/// value, or with the error of the attempt that ended the session. It can be
/// cancelled from elsewhere through a [`RetryHandle`].
#[must_use = "futures do nothing unless polled"]
pub struct Retry<F, Fut, E> {
    factory: F,
    config: RetryConfig<E>,
    backoff: Backoff,
    attempt: usize,
    delay: Duration,
    phase: Phase<Fut>,
    session: Arc<Mutex<Session<E>>>,
}

// `factory` is only ever called through `&mut`, and attempts are boxed.
impl<F, Fut, E> Unpin for Retry<F, Fut, E> {}

/// Cancels a [`Retry`] session while it is being awaited elsewhere.
///
/// Every method is a no-op once the session has completed or been cancelled.
pub struct RetryHandle<E> {
    session: Arc<Mutex<Session<E>>>,
}

/// Retries an asynchronous operation until it succeeds, fails permanently, or
/// exhausts the attempt budget.
///
/// `factory` is called for every attempt, the first one on the first poll.
/// After a failure:
/// - `config.report` is called with the error and the attempt number (from 1);
/// - if `config.retry_condition` rejects the error, or `config.max` attempts
///   have been made, that error is returned unchanged;
/// - otherwise the next attempt is scheduled after the current delay, and the
///   delay is grown by `backoff_exponent` up to `backoff_max` for the round
///   after. A zero delay yields to the executor once and retries right away.
///
/// # Example
/// ```rust
/// use async_std::task::block_on;
/// use settle_rs::asynchronous::retry;
/// use settle_rs::config::RetryConfig;
/// use std::time::Duration;
///
/// let mut calls = 0;
/// let config = RetryConfig::new(0, Duration::from_millis(5))
///     .with_report(|e: &String, attempt| println!("attempt {attempt} failed: {e}"));
///
/// let result = block_on(retry(
///     || {
///         calls += 1;
///         let outcome = if calls < 3 { Err(format!("boo {calls}")) } else { Ok("woop") };
///         async move { outcome }
///     },
///     config,
/// ));
/// assert_eq!(result, Ok("woop"));
/// ```
///
/// # Notes
/// - The function logs a warning for every failed attempt and when giving up.
pub fn retry<F, Fut, T, E>(factory: F, config: RetryConfig<E>) -> Retry<F, Fut, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry {
        factory,
        backoff: config.backoff(),
        delay: config.delay,
        config,
        attempt: 0,
        phase: Phase::Idle,
        session: Arc::new(Mutex::new(Session {
            state: SessionState::Running,
            waker: None,
        })),
    }
}

impl<F, Fut, E> Retry<F, Fut, E> {
    pub fn handle(&self) -> RetryHandle<E> {
        RetryHandle {
            session: Arc::clone(&self.session),
        }
    }

    /// The number of attempts started so far.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Rejects the session with [`Error::Cancelled`]. See [`RetryHandle::cancel`].
    pub fn cancel(&self)
    where
        E: From<Error>,
    {
        transition(&self.session, || {
            SessionState::Cancelled(Error::cancelled().into())
        });
    }

    pub fn cancel_with(&self, err: E) {
        transition(&self.session, || SessionState::Cancelled(err));
    }

    /// Stops the session without completing it. See [`RetryHandle::abandon`].
    pub fn abandon(&self) {
        transition(&self.session, || SessionState::Abandoned);
    }
}

impl<F, Fut, T, E> Retry<F, Fut, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    /// Checks the settlement guard. `None` means the session is still running.
    fn observe(&mut self, cx: &Context<'_>) -> Option<Poll<Result<T, E>>> {
        let mut session = lock(&self.session);
        match std::mem::replace(&mut session.state, SessionState::Settled) {
            SessionState::Running => {
                session.state = SessionState::Running;
                match &session.waker {
                    Some(waker) if waker.will_wake(cx.waker()) => {}
                    _ => session.waker = Some(cx.waker().clone()),
                }
                None
            }
            SessionState::Cancelled(err) => {
                self.phase = Phase::Finished;
                warn!("Retry cancelled after {} attempts.", self.attempt);
                Some(Poll::Ready(Err(err)))
            }
            SessionState::Abandoned => {
                session.state = SessionState::Abandoned;
                self.phase = Phase::Finished;
                Some(Poll::Pending)
            }
            SessionState::Settled => {
                self.phase = Phase::Finished;
                Some(Poll::Pending)
            }
        }
    }

    /// Completes the session with `result`, unless a handle got there first.
    fn settle(&mut self, result: Result<T, E>, cx: &Context<'_>) -> Poll<Result<T, E>> {
        let mut session = lock(&self.session);
        if matches!(session.state, SessionState::Running) {
            session.state = SessionState::Settled;
            session.waker = None;
            drop(session);
            self.phase = Phase::Finished;
            return Poll::Ready(result);
        }
        drop(session);
        self.observe(cx).unwrap_or(Poll::Pending)
    }

    /// Decides what follows a failed attempt.
    fn on_failure(&mut self, err: E, cx: &Context<'_>) -> Option<Poll<Result<T, E>>> {
        if let Some(done) = self.observe(cx) {
            return Some(done);
        }

        if let Some(report) = self.config.report.as_mut() {
            report(&err, self.attempt);
        }

        let should_retry = self.config.retry_condition.map_or(true, |f| f(&err));
        if !should_retry {
            warn!(
                "Operation failed (attempt {}/{}), not retryable, giving up.",
                self.attempt,
                budget(self.config.max)
            );
            return Some(self.settle(Err(err), cx));
        }

        if self.config.max != 0 && self.attempt >= self.config.max {
            warn!("Operation failed after {} attempts, giving up.", self.attempt);
            return Some(self.settle(Err(err), cx));
        }

        if self.delay.is_zero() {
            warn!(
                "Operation failed (attempt {}/{}), retrying immediately...",
                self.attempt,
                budget(self.config.max)
            );
            self.phase = Phase::Idle;
            cx.waker().wake_by_ref();
            return Some(Poll::Pending);
        }

        warn!(
            "Operation failed (attempt {}/{}), retrying after {:?}...",
            self.attempt,
            budget(self.config.max),
            self.delay
        );
        self.phase = Phase::Backoff(Box::pin(sleep(self.delay)));
        self.delay = self.backoff.next_delay(self.delay);
        None
    }
}

impl<F, Fut, T, E> Future for Retry<F, Fut, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            if let Some(done) = this.observe(cx) {
                return done;
            }

            match &mut this.phase {
                Phase::Idle => {
                    this.attempt += 1;
                    debug!("Starting attempt {}", this.attempt);
                    this.phase = Phase::Attempt(Box::pin((this.factory)()));
                }
                Phase::Attempt(attempt) => match ready!(attempt.as_mut().poll(cx)) {
                    Ok(output) => {
                        info!("Operation succeeded after {} attempts", this.attempt);
                        return this.settle(Ok(output), cx);
                    }
                    Err(err) => {
                        if let Some(done) = this.on_failure(err, cx) {
                            return done;
                        }
                    }
                },
                Phase::Backoff(delay) => {
                    ready!(delay.as_mut().poll(cx));
                    this.phase = Phase::Idle;
                }
                Phase::Finished => return Poll::Pending,
            }
        }
    }
}

impl<E> RetryHandle<E> {
    /// Rejects the session with `err`.
    ///
    /// The attempt in flight, if any, is dropped and its outcome ignored.
    pub fn cancel_with(&self, err: E) {
        transition(&self.session, || SessionState::Cancelled(err));
    }

    /// Rejects the session with [`Error::Cancelled`].
    pub fn cancel(&self)
    where
        E: From<Error>,
    {
        transition(&self.session, || {
            SessionState::Cancelled(Error::cancelled().into())
        });
    }

    /// Stops the session without completing it.
    ///
    /// No further attempt is made and the retry future stays pending forever.
    /// Meant for callers that already settled the outcome through another path.
    pub fn abandon(&self) {
        transition(&self.session, || SessionState::Abandoned);
    }

    /// Returns `true` once the session has completed, been cancelled or been abandoned.
    pub fn is_done(&self) -> bool {
        !matches!(lock(&self.session).state, SessionState::Running)
    }
}

/// Moves a running session to `next` and wakes the task awaiting it.
fn transition<E>(session: &Mutex<Session<E>>, next: impl FnOnce() -> SessionState<E>) {
    let mut session = lock(session);
    if !matches!(session.state, SessionState::Running) {
        debug!("Retry session already done; ignoring cancellation.");
        return;
    }
    session.state = next();
    if let Some(waker) = session.waker.take() {
        waker.wake();
    }
}

impl<E> Clone for RetryHandle<E> {
    fn clone(&self) -> Self {
        RetryHandle {
            session: Arc::clone(&self.session),
        }
    }
}

impl<E> fmt::Debug for RetryHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<F, Fut, E> fmt::Debug for Retry<F, Fut, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("attempt", &self.attempt)
            .field("delay", &self.delay)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn budget(max: usize) -> String {
    if max == 0 {
        "unlimited".to_string()
    } else {
        max.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use async_std::task::{block_on, sleep};
    use futures::future::{Either, join, select};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Debug, PartialEq, Eq)]
    enum DummyError {
        Custom(&'static str),
        Lib(Error),
    }

    impl std::fmt::Display for DummyError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                DummyError::Custom(message) => write!(f, "{}", message),
                DummyError::Lib(error) => write!(f, "{}", error),
            }
        }
    }

    impl From<Error> for DummyError {
        fn from(error: Error) -> Self {
            DummyError::Lib(error)
        }
    }

    /// Fails until the `succeed_on`-th call, counting calls in `attempts`.
    fn flaky(
        attempts: Arc<AtomicUsize>,
        succeed_on: usize,
    ) -> impl FnMut() -> Pin<Box<dyn Future<Output = Result<&'static str, DummyError>> + Send>> {
        move || {
            let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if count == succeed_on {
                    Ok("woop")
                } else {
                    Err(DummyError::Custom("boo"))
                }
            })
        }
    }

    // Suite for attempts and backoff
    mod retry_tests {
        use super::*;

        #[test]
        fn test_retry_success_first_try() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let config = RetryConfig::new(3, Duration::from_millis(10));

            let result = block_on(retry(flaky(attempts.clone(), 1), config));
            assert_eq!(result, Ok("woop"));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_retry_until_success_and_report() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let reported = Arc::new(Mutex::new(Vec::new()));
            let sink = reported.clone();
            let config = RetryConfig::default()
                .with_delay(Duration::from_millis(5))
                .with_backoff_max(Duration::from_millis(10))
                .with_report(move |e: &DummyError, attempt| {
                    assert_eq!(*e, DummyError::Custom("boo"));
                    sink.lock().unwrap().push(attempt);
                });

            let result = block_on(retry(flaky(attempts.clone(), 5), config));
            assert_eq!(result, Ok("woop"));
            assert_eq!(attempts.load(Ordering::SeqCst), 5);
            assert_eq!(*reported.lock().unwrap(), vec![1, 2, 3, 4]);
        }

        #[test]
        fn test_retry_respects_max() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = attempts.clone();
            let config = RetryConfig::new(100, Duration::ZERO);

            let result: Result<(), BoxError> = block_on(retry(
                move || {
                    let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err::<(), BoxError>(format!("reject {}", count).into()) }
                },
                config,
            ));
            assert_eq!(result.unwrap_err().to_string(), "reject 100");
            assert_eq!(attempts.load(Ordering::SeqCst), 100);
        }

        #[test]
        fn test_max_one_means_no_retry() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let reports = Arc::new(AtomicUsize::new(0));
            let counter = reports.clone();
            let config = RetryConfig::new(1, Duration::from_millis(10)).with_report(
                move |_: &DummyError, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            );

            let result = block_on(retry(flaky(attempts.clone(), 2), config));
            assert_eq!(result, Err(DummyError::Custom("boo")));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
            assert_eq!(reports.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_report_sees_final_failure() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let reported = Arc::new(Mutex::new(Vec::new()));
            let sink = reported.clone();
            let config = RetryConfig::new(3, Duration::ZERO).with_report(
                move |_: &DummyError, attempt| {
                    sink.lock().unwrap().push(attempt);
                },
            );

            let result = block_on(retry(flaky(attempts.clone(), 10), config));
            assert_eq!(result, Err(DummyError::Custom("boo")));
            assert_eq!(*reported.lock().unwrap(), vec![1, 2, 3]);
        }

        #[test]
        fn test_retry_backs_off() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let config = RetryConfig::default()
                .with_delay(Duration::from_millis(3))
                .with_backoff_exponent(1.5);

            let start = Instant::now();
            let result = block_on(retry(flaky(attempts.clone(), 5), config));
            let elapsed = start.elapsed();

            assert_eq!(result, Ok("woop"));
            // 3ms + 4.5ms + 6.75ms + 10.125ms
            assert!(elapsed > Duration::from_millis(20), "took {:?}", elapsed);
        }

        #[test]
        fn test_first_wait_uses_initial_delay() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let config = RetryConfig::new(2, Duration::from_millis(10))
                .with_backoff_exponent(100.0)
                .with_backoff_max(Duration::ZERO);

            let start = Instant::now();
            let result = block_on(retry(flaky(attempts.clone(), 10), config));
            let elapsed = start.elapsed();

            assert_eq!(result, Err(DummyError::Custom("boo")));
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
            assert!(elapsed >= Duration::from_millis(10), "took {:?}", elapsed);
            assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
        }

        #[test]
        fn test_retry_condition_stops_on_permanent_error() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let config = RetryConfig::new(5, Duration::from_millis(5))
                .with_retry_condition(|e: &DummyError| *e == DummyError::Custom("transient"));

            let result = block_on(retry(flaky(attempts.clone(), 3), config));
            assert_eq!(result, Err(DummyError::Custom("boo")));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_zero_delay_yields_to_other_futures() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = attempts.clone();
            let seen_at = Arc::new(AtomicUsize::new(0));
            let seen = seen_at.clone();

            let session = retry(
                move || {
                    let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if count == 50 {
                            Ok(count)
                        } else {
                            Err(DummyError::Custom("boo"))
                        }
                    }
                },
                RetryConfig::new(0, Duration::ZERO),
            );
            let watcher = async move {
                async_std::task::yield_now().await;
                seen.store(attempts.load(Ordering::SeqCst), Ordering::SeqCst);
            };

            let (result, ()) = block_on(join(session, watcher));
            assert_eq!(result, Ok(50));
            let seen_at = seen_at.load(Ordering::SeqCst);
            assert!(seen_at > 0 && seen_at < 50, "watcher ran at attempt {}", seen_at);
        }
    }

    // Suite for cancellation through `RetryHandle`
    mod cancel_tests {
        use super::*;

        #[test]
        fn test_cancel_rejects_running_session() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let session = retry(flaky(attempts.clone(), 1000), RetryConfig::default());
            let handle = session.handle();
            let canceller = async move {
                sleep(Duration::from_millis(20)).await;
                handle.cancel();
            };

            let (result, ()) = block_on(join(session, canceller));
            assert_eq!(result, Err(DummyError::Lib(Error::cancelled())));
            assert!(attempts.load(Ordering::SeqCst) >= 1);
        }

        #[test]
        fn test_cancel_with_custom_error() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let session = retry(flaky(attempts.clone(), 1000), RetryConfig::default());
            let handle = session.handle();
            let canceller = async move {
                sleep(Duration::from_millis(10)).await;
                handle.cancel_with(DummyError::Custom("shutting down"));
            };

            let (result, ()) = block_on(join(session, canceller));
            assert_eq!(result, Err(DummyError::Custom("shutting down")));
        }

        #[test]
        fn test_in_flight_attempt_is_ignored_after_cancel() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = attempts.clone();
            let session = retry(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        sleep(Duration::from_millis(50)).await;
                        Ok::<_, DummyError>("too late")
                    }
                },
                RetryConfig::default(),
            );
            let handle = session.handle();
            let canceller = async move {
                sleep(Duration::from_millis(10)).await;
                handle.cancel();
            };

            let (result, ()) = block_on(join(session, canceller));
            assert_eq!(result, Err(DummyError::Lib(Error::cancelled())));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_cancel_after_resolve_has_no_effect() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let mut session = retry(flaky(attempts.clone(), 2), RetryConfig::new(0, Duration::ZERO));
            let handle = session.handle();

            let result = block_on(&mut session);
            assert_eq!(result, Ok("woop"));
            assert!(handle.is_done());

            handle.cancel();
            handle.cancel_with(DummyError::Custom("late"));
            handle.abandon();
            assert_eq!(session.attempts(), 2);
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_cancel_after_reject_has_no_effect() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let session = retry(flaky(attempts.clone(), 10), RetryConfig::new(2, Duration::ZERO));
            let handle = session.handle();

            let result = block_on(session);
            assert_eq!(result, Err(DummyError::Custom("boo")));

            handle.cancel();
            assert!(handle.is_done());
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_abandon_leaves_session_pending() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let abandoned_at = Arc::new(AtomicUsize::new(0));
            let session = retry(
                flaky(attempts.clone(), 1000),
                RetryConfig::new(0, Duration::from_millis(5)),
            );
            let handle = session.handle();
            let counter = attempts.clone();
            let marker = abandoned_at.clone();
            let abandoner: Pin<Box<dyn Future<Output = ()>>> = Box::pin(async move {
                sleep(Duration::from_millis(12)).await;
                handle.abandon();
                marker.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
                sleep(Duration::from_millis(40)).await;
            });

            match block_on(select(session, abandoner)) {
                Either::Left((result, _)) => panic!("abandoned session settled: {:?}", result),
                Either::Right(((), session)) => {
                    assert!(session.handle().is_done());
                    assert!(abandoned_at.load(Ordering::SeqCst) >= 1);
                    assert_eq!(
                        attempts.load(Ordering::SeqCst),
                        abandoned_at.load(Ordering::SeqCst)
                    );
                }
            }
        }

        #[test]
        fn test_cancel_on_session_itself() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let mut session = retry(
                flaky(attempts.clone(), 1000),
                RetryConfig::new(0, Duration::from_millis(5)),
            );
            let pause: Pin<Box<dyn Future<Output = ()>>> =
                Box::pin(sleep(Duration::from_millis(12)));

            match block_on(select(&mut session, pause)) {
                Either::Left((result, _)) => panic!("session settled early: {:?}", result),
                Either::Right(((), _)) => {}
            }
            let made = session.attempts();
            assert!(made >= 1);

            session.cancel();
            session.cancel_with(DummyError::Custom("ignored"));
            session.abandon();

            let result = block_on(&mut session);
            assert_eq!(result, Err(DummyError::Lib(Error::cancelled())));
            assert_eq!(attempts.load(Ordering::SeqCst), made);
            assert!(session.handle().is_done());
        }

        #[test]
        fn test_cancel_with_and_abandon_on_session_itself() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let session = retry(flaky(attempts.clone(), 1000), RetryConfig::default());
            session.cancel_with(DummyError::Custom("stop"));
            assert_eq!(block_on(session), Err(DummyError::Custom("stop")));

            let abandoned = retry(flaky(attempts.clone(), 1000), RetryConfig::default());
            abandoned.abandon();
            abandoned.cancel();
            let later: Pin<Box<dyn Future<Output = ()>>> =
                Box::pin(sleep(Duration::from_millis(20)));
            match block_on(select(abandoned, later)) {
                Either::Left((result, _)) => panic!("abandoned session settled: {:?}", result),
                Either::Right(((), abandoned)) => assert!(abandoned.handle().is_done()),
            }
            assert_eq!(attempts.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn test_first_cancellation_wins() {
            let attempts = Arc::new(AtomicUsize::new(0));
            let session = retry(flaky(attempts.clone(), 1000), RetryConfig::default());
            let first = session.handle();
            let second = first.clone();

            first.cancel_with(DummyError::Custom("first"));
            second.cancel_with(DummyError::Custom("second"));
            second.abandon();

            let result = block_on(session);
            assert_eq!(result, Err(DummyError::Custom("first")));
            assert_eq!(attempts.load(Ordering::SeqCst), 0);
        }
    }
}
