use std::time::Duration;

/// Multiplicative backoff applied between retry attempts.
///
/// After every retry is scheduled, the current delay is multiplied by `exponent`
/// and clamped to `max`. The wait used for the attempt being scheduled is always
/// the value *before* the multiplication.
///
/// ### Example
/// With a 100ms initial delay, an exponent of `1.5` and a ceiling of 300ms:
/// - Retry 1: 100ms
/// - Retry 2: 150ms
/// - Retry 3: 225ms
/// - Retry 4: 300ms
/// - And so on, capped at 300ms...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Multiplier applied to the delay after each scheduled retry. `1.0` keeps it constant.
    pub exponent: f64,
    /// Ceiling for the delay. `Duration::ZERO` means no ceiling.
    pub max: Duration,
}

impl Backoff {
    pub fn new(exponent: f64, max: Duration) -> Self {
        Backoff { exponent, max }
    }

    /// Calculates the delay for the round after `delay`.
    ///
    /// Non-finite or non-positive exponents leave the delay untouched, and a
    /// product too large to represent saturates to the ceiling (or to
    /// `Duration::MAX` when there is none).
    ///
    /// # Arguments
    /// * `delay` - The delay that was just used to schedule a retry.
    ///
    /// # Returns
    /// The delay to use for the next scheduled retry.
    pub(crate) fn next_delay(&self, delay: Duration) -> Duration {
        if !self.exponent.is_finite() || self.exponent <= 0.0 {
            return self.clamp(delay);
        }
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * self.exponent)
            .unwrap_or(Duration::MAX);
        self.clamp(grown)
    }

    fn clamp(&self, delay: Duration) -> Duration {
        if !self.max.is_zero() && delay > self.max {
            self.max
        } else {
            delay
        }
    }
}

impl Default for Backoff {
    /// # Default Configuration
    /// - `exponent` of 1.1
    /// - `max` of 60 seconds
    fn default() -> Self {
        Backoff {
            exponent: 1.1,
            max: Duration::from_secs(60),
        }
    }
}
