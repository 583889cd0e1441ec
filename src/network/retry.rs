//! Retry policy with exponential backoff.
//!
//! A [`RetryPolicy`] decides, after each failed attempt, whether another
//! attempt is made and how long to wait before it.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(i) = min(base_delay * multiplier^i, max_delay) + jitter
//! ```
//!
//! where `i` is the 0-indexed attempt that just failed. Jitter defaults to zero,
//! so with defaults the delays are exactly 1s, 2s, 4s.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use firmament_net::network::{ErrorKind, NetworkError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = NetworkError::new(ErrorKind::ServerError, Some(503), "HTTP 503");
//!
//! match policy.should_retry(&error, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(1));
//!         assert_eq!(attempt, 1);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::error::{NetworkError, PolicyError};

/// Default maximum number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (10 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default backoff multiplier (doubles each attempt).
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

type RetryPredicate = Arc<dyn Fn(&NetworkError) -> bool + Send + Sync>;

/// Decision on whether to make another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Index of the next attempt (0-indexed, so the first retry is attempt 1).
        attempt: u32,
    },

    /// Stop; the failure is terminal.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (four attempts in total)
/// - `base_delay`: 1 second
/// - `max_delay`: 10 seconds
/// - `backoff_multiplier`: 2.0
/// - predicate: [`NetworkError::is_retryable`]
/// - jitter: none
/// - `Retry-After`: ignored
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    retry_predicate: RetryPredicate,
    max_jitter: Duration,
    respect_retry_after: bool,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_jitter", &self.max_jitter)
            .field("respect_retry_after", &self.respect_retry_after)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_predicate: Arc::new(NetworkError::is_retryable),
            max_jitter: Duration::ZERO,
            respect_retry_after: false,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom backoff settings.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the multiplier is below 1 (or not finite), or
    /// if `max_delay` is below `base_delay`.
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, PolicyError> {
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier {
                value: backoff_multiplier,
            });
        }
        if max_delay < base_delay {
            return Err(PolicyError::MaxDelayBelowBase {
                base_ms: base_delay.as_millis(),
                max_ms: max_delay.as_millis(),
            });
        }

        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        })
    }

    /// Creates a policy with a custom retry count, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Replaces the predicate deciding which errors are retried.
    ///
    /// The predicate is consulted after every failed attempt; returning
    /// `false` makes the failure terminal.
    #[must_use]
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NetworkError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    /// Adds up to `max_jitter` of random delay on top of each backoff.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Uses the server's `Retry-After` hint, when present, instead of the backoff.
    #[must_use]
    pub fn respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = enabled;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether the predicate accepts this error for another attempt.
    #[must_use]
    pub fn accepts(&self, error: &NetworkError) -> bool {
        (self.retry_predicate)(error)
    }

    /// Determines whether to retry after a failed attempt.
    ///
    /// `attempt` is the 0-indexed attempt that just failed.
    pub fn should_retry(&self, error: &NetworkError, attempt: u32) -> RetryDecision {
        if !self.accepts(error) {
            return RetryDecision::DoNotRetry {
                reason: format!("{} failure is not retryable", error.kind()),
            };
        }

        if attempt >= self.max_retries {
            debug!(attempt, max_retries = self.max_retries, "retries exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.backoff_for(attempt, error);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff delay for the given failed attempt: `min(base * multiplier^attempt, max)`.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`. Excludes jitter
    /// and `Retry-After`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_nanos = self.base_delay.as_nanos() as f64;
        let max_nanos = self.max_delay.as_nanos() as f64;

        let delay_nanos = (base_nanos * self.backoff_multiplier.powi(exponent)).min(max_nanos);
        Duration::from_nanos(delay_nanos as u64)
    }

    /// The delay actually slept before the next attempt.
    fn backoff_for(&self, attempt: u32, error: &NetworkError) -> Duration {
        if self.respect_retry_after
            && let Some(retry_after) = error.retry_after()
        {
            return retry_after;
        }
        self.delay_for_attempt(attempt) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::network::error::ErrorKind;

    fn server_error() -> NetworkError {
        NetworkError::new(ErrorKind::ServerError, Some(503), "HTTP 503")
    }

    fn client_error() -> NetworkError {
        NetworkError::new(ErrorKind::ClientError, Some(404), "HTTP 404")
    }

    // ==================== Construction ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(10));
        assert!((policy.backoff_multiplier() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_policy_with_max_retries_keeps_defaults() {
        let policy = RetryPolicy::with_max_retries(5);
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_rejects_multiplier_below_one() {
        let result = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert!(matches!(result, Err(PolicyError::InvalidMultiplier { .. })));
    }

    #[test]
    fn test_retry_policy_rejects_nan_multiplier() {
        let result =
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), f64::NAN);
        assert!(matches!(result, Err(PolicyError::InvalidMultiplier { .. })));
    }

    #[test]
    fn test_retry_policy_rejects_max_below_base() {
        let result = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1), 2.0);
        assert!(matches!(result, Err(PolicyError::MaxDelayBelowBase { .. })));
    }

    // ==================== Delay Calculation ====================

    #[test]
    fn test_delay_doubles_from_base() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0).unwrap();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_fractional_multiplier() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(10), 1.5).unwrap();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2250));
    }

    #[test]
    fn test_delay_respects_max_delay() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0).unwrap();
        // 1 * 2^5 = 32s, capped at 5s
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_sequence_non_decreasing_and_matches_formula() {
        let base = Duration::from_millis(250);
        let max = Duration::from_secs(8);
        for multiplier in [1.0, 1.25, 2.0, 3.0] {
            let policy = RetryPolicy::new(20, base, max, multiplier).unwrap();
            let mut previous = Duration::ZERO;
            for attempt in 0..20 {
                let delay = policy.delay_for_attempt(attempt);
                let expected_ms =
                    (250.0 * multiplier.powi(i32::try_from(attempt).unwrap())).min(8000.0);
                let actual_ms = delay.as_secs_f64() * 1000.0;
                assert!(
                    (actual_ms - expected_ms).abs() < 0.001,
                    "multiplier {multiplier}, attempt {attempt}: {actual_ms} != {expected_ms}"
                );
                assert!(delay >= previous, "delay decreased at attempt {attempt}");
                assert!(delay <= max);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let jitter = policy.calculate_jitter();
            assert!(jitter <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_no_jitter_by_default() {
        assert_eq!(RetryPolicy::default().calculate_jitter(), Duration::ZERO);
    }

    // ==================== Retry Decisions ====================

    #[test]
    fn test_should_retry_retryable_error() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(&server_error(), 0);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_should_retry_non_retryable_error_stops() {
        let policy = RetryPolicy::with_max_retries(10);
        let decision = policy.should_retry(&client_error(), 0);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("not retryable"));
        }
    }

    #[test]
    fn test_should_retry_respects_max_retries() {
        let policy = RetryPolicy::with_max_retries(2);
        assert!(matches!(
            policy.should_retry(&server_error(), 0),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(&server_error(), 1),
            RetryDecision::Retry { .. }
        ));
        let decision = policy.should_retry(&server_error(), 2);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        }
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = RetryPolicy::no_retry();
        assert!(matches!(
            policy.should_retry(&server_error(), 0),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_custom_predicate_overrides_retryable_flag() {
        let policy = RetryPolicy::default().retry_when(|error| error.status_code() == Some(404));
        assert!(matches!(
            policy.should_retry(&client_error(), 0),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(&server_error(), 0),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_retry_after_used_when_enabled() {
        let error = server_error().with_retry_after(Some(Duration::from_secs(7)));

        let ignoring = RetryPolicy::default();
        assert_eq!(
            ignoring.should_retry(&error, 0),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 1
            }
        );

        let respecting = RetryPolicy::default().respect_retry_after(true);
        assert_eq!(
            respecting.should_retry(&error, 0),
            RetryDecision::Retry {
                delay: Duration::from_secs(7),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_default_max_retries_constant() {
        assert_eq!(DEFAULT_MAX_RETRIES, 3);
    }
}
