/// The `asynchronous` module provides the three settlement primitives: a cancellable
/// delayed-error timer, a timeout race for an arbitrary operation, and a retry driver
/// with multiplicative backoff. Each of them settles at most once.
pub mod asynchronous;

/// The `config` module provides configuration structures for the retry driver,
/// such as the initial delay, backoff growth and the attempt budget.
pub mod config;

/// The `error` module defines the errors synthesized by this crate itself
/// (timeouts and cancellations) and how the error of an expired timer is described.
pub mod error;

/// The `strategies` module computes the delay between retry attempts.
///
/// It is used by the retry driver to grow the wait after every failed attempt.
pub mod strategies;
