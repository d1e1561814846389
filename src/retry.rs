//! Retry configuration and backoff logic.
//!
//! This module provides the [`RetryConfig`] type and the [`Backoff`] state
//! used by [`Channel::connect`](crate::Channel::connect) to ride out a
//! broker that is not yet reachable.
//!
//! # Retry Strategy
//!
//! - Only retries errors for which [`Error::is_retryable`](crate::Error::is_retryable) holds
//! - Fixed delay by default (`multiplier` 1.0, no jitter), matching the classic
//!   "N connection attempts, D seconds apart" broker client behaviour
//! - Optional exponential backoff with ±25% jitter, capped at `max_delay`
//! - Logs each retry attempt with timing information for debugging

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;

use crate::log_debug;

/// Default number of connect attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Default delay between connect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry configuration.
///
/// # Example
///
/// ```
/// use cloud_messenger::RetryConfig;
/// use std::time::Duration;
///
/// // 5 attempts in total, 2 seconds apart
/// let retry = RetryConfig::fixed(5, Duration::from_secs(2));
/// assert_eq!(retry.max_attempts, 4);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    ///
    /// 1.0 keeps the delay fixed; 2.0 doubles it each time.
    pub multiplier: f32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retry attempts (caps exponential growth).
    pub max_delay: Duration,

    /// Randomize each delay by ±25%.
    pub jitter: bool,
}

impl RetryConfig {
    /// `attempts` total attempts with a fixed `delay` between them.
    ///
    /// An `attempts` value of 0 is treated as 1: the operation always runs
    /// at least once.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        // ---
        Self {
            max_attempts: attempts.saturating_sub(1),
            multiplier: 1.0,
            initial_delay: delay,
            max_delay: delay,
            jitter: false,
        }
    }

    /// Total number of times the operation may run.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

impl Default for RetryConfig {
    /// 10 attempts, 1 second apart.
    fn default() -> Self {
        Self::fixed(DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Backoff state for one retry sequence.
///
/// The caller runs the operation itself and hands each failure to
/// [`Backoff::wait`], which sleeps for the next delay or reports that the
/// sequence is over. Keeping the loop at the call site lets the operation
/// borrow the caller's state mutably on every attempt.
///
/// # Backoff Algorithm
///
/// - First retry: `initial_delay`
/// - Subsequent retries: `min(current_delay * multiplier, max_delay)`
/// - Jitter (when enabled): ±25% randomization
///
/// # Example
///
/// ```ignore
/// let mut backoff = Backoff::new(&retry);
/// loop {
///     let err = match transport.open().await {
///         Ok(()) => break,
///         Err(err) => err,
///     };
///     if !backoff.wait(&err).await {
///         return Err(err);
///     }
/// }
/// ```
pub(crate) struct Backoff<'a> {
    // ---
    config: &'a RetryConfig,
    attempt: u32,
    current_delay: Duration,
}

impl<'a> Backoff<'a> {
    pub(crate) fn new(config: &'a RetryConfig) -> Self {
        // ---
        Self {
            config,
            attempt: 0,
            current_delay: config.initial_delay,
        }
    }

    /// Number of failed attempts seen so far.
    pub(crate) fn failures(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and sleep before the next attempt.
    ///
    /// Returns `false` without sleeping when `err` is not retryable or the
    /// configured attempts are exhausted.
    pub(crate) async fn wait(&mut self, err: &crate::Error) -> bool {
        // ---
        self.attempt += 1;

        if !err.is_retryable() {
            return false;
        }

        if self.attempt > self.config.max_attempts {
            log_debug!(
                "retry exhausted after {} attempts, last error: {}",
                self.config.total_attempts(),
                err
            );
            return false;
        }

        let delay = if self.config.jitter {
            apply_jitter(self.current_delay)
        } else {
            self.current_delay
        };

        log_debug!(
            "retry attempt {}/{}, waiting {:?} before retry (error: {})",
            self.attempt,
            self.config.max_attempts,
            delay,
            err
        );

        sleep(delay).await;

        let next_delay = Duration::from_secs_f64(
            self.current_delay.as_secs_f64() * self.config.multiplier as f64,
        );
        self.current_delay = next_delay.min(self.config.max_delay);
        true
    }
}

/// Apply ±25% jitter to a duration.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}
