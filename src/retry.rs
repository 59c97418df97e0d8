//! Bounded retry combinator applied at every network boundary.
//!
//! Connection acquisition, chunked uploads and load jobs all go through
//! [`retry`]. Retried operations must be safe to re-issue: the combinator never
//! deduplicates their side effects.

use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// Attempt ceiling shared by every retried operation.
pub const MAX_RETRY: u32 = 3;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Pause before the second attempt; `0` retries immediately.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth factor between delays; values below `1.0` keep the delay constant.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY,
            initial_delay_ms: 0,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn next_delay(&self, delay_ms: u64) -> u64 {
        let factor = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let grown = (delay_ms as f64 * factor).round();
        grown.min(self.max_delay_ms as f64) as u64
    }
}

/// Result of a retried operation plus the attempt bookkeeping.
///
/// `last_error` is cleared as soon as one attempt succeeds.
#[derive(Debug)]
pub struct RetryState<T, E> {
    pub result: Option<T>,
    pub attempts: u32,
    pub last_error: Option<E>,
}

impl<T, E> RetryState<T, E> {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.result.is_some()
    }

    /// Collapse into a `Result`, surfacing the last observed error on failure.
    ///
    /// # Errors
    ///
    /// Returns the last error when every attempt failed. Returns `on_empty()`
    /// when no attempt ran at all (a ceiling of zero).
    pub fn into_result(self, on_empty: impl FnOnce() -> E) -> Result<T, E> {
        match (self.result, self.last_error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(on_empty()),
        }
    }
}

/// Call `operation` until it succeeds or `config.max_attempts` is exhausted.
///
/// The operation receives the 1-based attempt number, so callers can vary what
/// they do on the first try (e.g. reuse an existing connection).
///
/// # Example
/// ```
/// use hivebridge::retry::{retry, RetryConfig};
///
/// let mut calls = 0;
/// let state = retry(&RetryConfig::default(), |_attempt| {
///     calls += 1;
///     if calls < 2 { Err("transient") } else { Ok(calls) }
/// });
/// assert_eq!(state.result, Some(2));
/// assert_eq!(state.attempts, 2);
/// assert!(state.last_error.is_none());
/// ```
pub fn retry<T, E, F>(config: &RetryConfig, mut operation: F) -> RetryState<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut state = RetryState {
        result: None,
        attempts: 0,
        last_error: None,
    };
    let mut delay_ms = config.initial_delay_ms;

    while state.attempts < config.max_attempts {
        state.attempts += 1;
        match operation(state.attempts) {
            Ok(value) => {
                state.result = Some(value);
                state.last_error = None;
                break;
            }
            Err(err) => {
                warn!(
                    attempt = state.attempts,
                    max_attempts = config.max_attempts,
                    "attempt failed: {err}"
                );
                state.last_error = Some(err);

                if state.attempts < config.max_attempts && delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = config.next_delay(delay_ms);
                }
            }
        }
    }

    state
}
