//! Reconnect delay policies.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any retry delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub factor: f64,
    /// Random jitter factor (0.0–1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    fn delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = self.factor.powf(f64::from(attempt));
        let base = (initial * exponent).min(max);

        if self.jitter == 0.0 {
            return Duration::from_secs_f64(base);
        }

        let randomized = rand::rng().random_range(0.0..=base);
        let blended = base * (1.0 - self.jitter) + randomized * self.jitter;
        Duration::from_secs_f64(blended)
    }
}

/// How long to wait before re-opening the stream after a transport error.
///
/// The delay is chosen from the number of consecutive failures seen so far,
/// so a healthy open or accepted payload starts the next burst from the
/// beginning again.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffPolicy {
    /// A short delay for the first failure of a burst, then a flat longer one.
    Stepped {
        /// Delay after the first consecutive failure.
        first: Duration,
        /// Delay after every later consecutive failure.
        subsequent: Duration,
    },
    /// Capped exponential growth with jitter.
    Exponential(BackoffConfig),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Stepped {
            first: Duration::from_secs(1),
            subsequent: Duration::from_secs(20),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows failure number `failures`
    /// (1-based) of the current burst.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self {
            Self::Stepped { first, subsequent } => {
                if failures <= 1 {
                    *first
                } else {
                    *subsequent
                }
            }
            Self::Exponential(config) => config.delay(failures.saturating_sub(1)),
        }
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns an error message string if a delay or factor is out of range.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Stepped { first, subsequent } => {
                if first.is_zero() {
                    return Err("First retry delay must be > 0".to_string());
                }
                if subsequent < first {
                    return Err("Subsequent retry delay must be >= first retry delay".to_string());
                }
                Ok(())
            }
            Self::Exponential(config) => config.validate(),
        }
    }
}
