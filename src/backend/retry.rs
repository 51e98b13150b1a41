//! Retry policy and clock abstraction
//!
//! Connect and enumerate are retried with a fixed delay until they succeed.
//! The delay goes through a [`Clock`] so tests can run the policy against a
//! [`ManualClock`] instead of sleeping in real time.

use crate::error::{Result, StationError};
use chrono::{DateTime, Local};
use std::time::Duration;

/// Source of wall-clock time and blocking delays
pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> DateTime<Local>;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fixed-delay retry policy
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub delay: Duration,
    /// Give up after this many attempts (`None` retries forever)
    pub max_attempts: Option<u32>,
    /// Which errors are worth another attempt; others propagate at once
    pub retry_on: fn(&StationError) -> bool,
}

impl RetryPolicy {
    /// Retry connection-class errors forever with a fixed delay
    pub const fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            retry_on: StationError::is_connection_class,
        }
    }

    /// Cap the number of attempts
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt cap is reached
    pub fn run<T, F>(&self, clock: &dyn Clock, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded after {} attempts", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if (self.retry_on)(&e) => {
                    tracing::error!("{} failed (attempt {}): {}", operation, attempt, e);
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(StationError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    clock.sleep(self.delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("delay", &self.delay)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(crate::config::RETRY_DELAY)
    }
}

#[cfg(any(test, feature = "mock-hub"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "mock-hub"))]
mod manual {
    use super::Clock;
    use crate::backend::lock;
    use chrono::{DateTime, Local, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Clock that only moves when slept on
    ///
    /// Every `sleep` is recorded and advances `now` by the slept duration.
    pub struct ManualClock {
        now: Mutex<DateTime<Local>>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Local>) -> Self {
            Self {
                now: Mutex::new(start),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        /// Clock starting at a Unix timestamp
        pub fn at_unix(seconds: i64) -> Self {
            let start = Local
                .timestamp_opt(seconds, 0)
                .single()
                .unwrap_or_else(Local::now);
            Self::new(start)
        }

        /// Every duration passed to `sleep`, in order
        pub fn sleeps(&self) -> Vec<Duration> {
            lock(&self.sleeps).clone()
        }

        /// Move time forward without recording a sleep
        pub fn advance(&self, duration: Duration) {
            let mut now = lock(&self.now);
            *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *lock(&self.now)
        }

        fn sleep(&self, duration: Duration) {
            lock(&self.sleeps).push(duration);
            self.advance(duration);
        }
    }
}
