//! Wait-time strategies for the retry engine

use std::time::Duration;

/// Wait-time strategy between retry attempts
///
/// All variants are pure functions of the 1-indexed attempt number.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Fixed delay between retries
    Constant { delay: Duration },
    /// Linearly increasing delay, clamped to `[min, max]`
    Linear { min: Duration, step: Duration, max: Duration },
    /// Exponentially increasing delay with a cap
    Exponential { min: Duration, factor: f64, max: Duration },
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Create a linear backoff strategy
    pub fn linear(min: Duration, step: Duration, max: Duration) -> Self {
        Backoff::Linear { min, step, max }
    }

    /// Create an exponential backoff strategy
    pub fn exponential(min: Duration, factor: f64, max: Duration) -> Self {
        Backoff::Exponential { min, factor, max }
    }

    /// No waiting between attempts
    pub fn none() -> Self {
        Backoff::Constant { delay: Duration::ZERO }
    }

    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        let n = attempt.max(1);
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { min, step, max } => {
                // Use checked_mul to prevent overflow
                let grown = step
                    .checked_mul((n - 1) as u32)
                    .and_then(|d| d.checked_add(*min))
                    .unwrap_or(*max);
                grown.clamp(*min, *max)
            }
            Backoff::Exponential { min, factor, max } => {
                let multiplier = factor.powi((n - 1) as i32);
                if !multiplier.is_finite() || multiplier < 0.0 {
                    return *max;
                }
                let scaled = min.as_secs_f64() * multiplier;
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// A literal duration resolves to a constant strategy.
impl From<Duration> for Backoff {
    fn from(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }
}
