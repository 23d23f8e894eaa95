use crate::strategies::Backoff;
use std::fmt;
use std::time::Duration;

/// Observer invoked with the error and the 1-based attempt number of every failed attempt.
pub type Report<E> = Box<dyn FnMut(&E, usize) + Send>;

/// Configuration for the retry driver.
///
/// This struct defines how a failing operation is retried: how long to wait
/// before the next attempt, how that wait grows, how many attempts are made in
/// total, and which observers see the failures.
pub struct RetryConfig<E> {
    /// The wait before the first retry.
    ///
    /// A zero delay disables backoff scheduling altogether: the next attempt
    /// starts as soon as the executor polls the retry future again.
    pub delay: Duration,

    /// The multiplier applied to the delay after each scheduled retry.
    ///
    /// For example, with a `delay` of 100ms and an exponent of `2.0` the retries
    /// wait 100ms, 200ms, 400ms and so on, up to `backoff_max`.
    ///
    /// A zero, negative or non-finite exponent does not fall back to the
    /// default `1.1`: it disables growth and every retry waits `delay`.
    pub backoff_exponent: f64,

    /// The ceiling for the delay.
    ///
    /// `Duration::ZERO` does not fall back to the default 60 seconds: it
    /// disables the ceiling, so the delay may grow without bound.
    pub backoff_max: Duration,

    /// The maximum number of attempts, including the first one.
    ///
    /// `0` means unlimited. `1` means the operation is never retried. Once the
    /// budget is spent, the error of the last attempt is returned unchanged.
    pub max: usize,

    /// An optional observer of failed attempts.
    ///
    /// It is called for every failure, including the last one and the ones
    /// that will be retried, with the attempt number counting from 1.
    pub report: Option<Report<E>>,

    /// An optional function to determine if a retry should be attempted.
    ///
    /// It takes a reference to the error (`&E`) and returns a `bool`:
    /// - `true` if the operation should be retried.
    /// - `false` if the error is permanent, causing the retry to fail immediately.
    ///
    /// If set to `None` (the default), all errors trigger a retry up to `max`.
    pub retry_condition: Option<fn(&E) -> bool>,
}

impl<E> Default for RetryConfig<E> {
    /// Provides a default configuration for retrying operations.
    ///
    /// The default configuration includes:
    /// - `delay`: 100 milliseconds before the first retry
    /// - `backoff_exponent`: 1.1
    /// - `backoff_max`: 60 seconds
    /// - `max`: 0, meaning unlimited attempts
    /// - `report` and `retry_condition`: `None`
    fn default() -> Self {
        let backoff = Backoff::default();
        RetryConfig {
            delay: Duration::from_millis(100),
            backoff_exponent: backoff.exponent,
            backoff_max: backoff.max,
            max: 0,
            report: None,
            retry_condition: None,
        }
    }
}

impl<E> RetryConfig<E> {
    /// Creates a new `RetryConfig` with the given attempt budget and initial delay.
    ///
    /// The backoff growth and ceiling keep their default values.
    ///
    /// # Arguments
    /// * `max` - The maximum number of attempts (including the initial attempt), `0` for unlimited.
    /// * `delay` - The wait before the first retry.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use settle_rs::config::RetryConfig;
    /// let config = RetryConfig::<String>::new(5, Duration::from_millis(50));
    /// assert_eq!(config.max, 5);
    /// assert_eq!(config.backoff_exponent, 1.1);
    /// ```
    pub fn new(max: usize, delay: Duration) -> Self {
        RetryConfig {
            max,
            delay,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff_exponent(mut self, exponent: f64) -> Self {
        self.backoff_exponent = exponent;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Sets an observer for failed attempts and returns the modified `RetryConfig`.
    ///
    /// # Examples
    /// ```
    /// use settle_rs::config::RetryConfig;
    /// let config = RetryConfig::default()
    ///     .with_report(|e: &String, attempt| eprintln!("attempt {attempt} failed: {e}"));
    /// assert!(config.report.is_some());
    /// ```
    pub fn with_report<R>(mut self, report: R) -> Self
    where
        R: FnMut(&E, usize) + Send + 'static,
    {
        self.report = Some(Box::new(report));
        self
    }

    /// Sets a custom retry condition and returns the modified `RetryConfig`.
    ///
    /// # Examples
    /// ```
    /// use settle_rs::config::RetryConfig;
    /// let config = RetryConfig::default()
    ///     .with_retry_condition(|e: &String| e.contains("transient"));
    /// assert!(config.retry_condition.is_some());
    /// ```
    pub fn with_retry_condition(mut self, retry_condition: fn(&E) -> bool) -> Self {
        self.retry_condition = Some(retry_condition);
        self
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_exponent, self.backoff_max)
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("delay", &self.delay)
            .field("backoff_exponent", &self.backoff_exponent)
            .field("backoff_max", &self.backoff_max)
            .field("max", &self.max)
            .field("report", &self.report.as_ref().map(|_| "<fn>"))
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}
