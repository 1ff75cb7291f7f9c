//! Retry policy shared by discovery polling and connection

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default number of attempts
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Shortest wait between deadline-bounded attempts
const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (0 is treated as 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff: f64,
    /// Upper bound of the random extra delay added to each wait
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff: 1.0,
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff: 1.0,
            jitter_ms: 0,
        }
    }

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let base = (self.delay_ms as f64 * factor) as u64;
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Run `op` until it succeeds or attempts are exhausted
    ///
    /// `op` receives the 1-based attempt number. All errors are returned so
    /// the caller can report every failure, not just the last one.
    pub fn run<T, E, F>(&self, mut op: F) -> std::result::Result<T, Vec<E>>
    where
        F: FnMut(u32) -> std::result::Result<T, E>,
    {
        let mut failures = Vec::new();
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => failures.push(e),
            }
            if attempt < attempts {
                thread::sleep(self.delay_after(attempt));
            }
        }
        Err(failures)
    }

    /// Run `op` until it succeeds or `timeout` has elapsed
    ///
    /// Waits between attempts follow [`RetryPolicy::delay_after`], cut short
    /// at the deadline so the last attempt happens on time. `max_attempts`
    /// is ignored; the deadline bounds the loop.
    pub fn run_until<T, E, F>(&self, timeout: Duration, mut op: F) -> std::result::Result<T, Vec<E>>
    where
        F: FnMut(u32) -> std::result::Result<T, E>,
    {
        let deadline = Instant::now() + timeout;
        let mut failures = Vec::new();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => failures.push(e),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(failures);
            }
            thread::sleep(self.delay_after(attempt).max(MIN_POLL_DELAY).min(remaining));
            attempt = attempt.saturating_add(1);
        }
    }
}
