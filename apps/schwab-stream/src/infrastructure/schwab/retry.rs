//! Retry Policy
//!
//! Bounded exponential backoff with jitter for credential refresh calls.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ApiSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Create configuration from `ApiSettings`.
    #[must_use]
    pub fn from_api_settings(settings: &ApiSettings) -> Self {
        Self {
            initial_delay: settings.refresh_retry_delay,
            max_attempts: settings.refresh_max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Stateful backoff for one operation.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// `None` once every attempt is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt_count += 1;
        if self.attempt_count >= self.config.max_attempts {
            return None;
        }

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            scaled as u64
        } else {
            0
        };
        let max_millis = u64::try_from(self.config.max_delay.as_millis()).unwrap_or(u64::MAX);
        self.current_delay = Duration::from_millis(next_millis.min(max_millis));

        Some(delay)
    }

    /// Failed attempts so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut policy = RetryPolicy::new(no_jitter(10));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = RetryPolicy::new(no_jitter(3));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn single_attempt_never_retries() {
        let mut policy = RetryPolicy::new(no_jitter(1));
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = RetryPolicy::new(RetryConfig {
                initial_delay: Duration::from_millis(1000),
                ..RetryConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn from_settings_keeps_at_least_one_attempt() {
        let settings = ApiSettings {
            refresh_max_attempts: 0,
            ..ApiSettings::default()
        };
        assert_eq!(RetryConfig::from_api_settings(&settings).max_attempts, 1);
    }
}
