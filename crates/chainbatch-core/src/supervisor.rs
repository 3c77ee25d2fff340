//! Retry bookkeeping for the outer processing loop.
//!
//! The policy is a capped count with a fixed delay between passes.

use std::time::Duration;

/// What the supervisor does after a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then run another pass.
    Retry(Duration),
    /// Budget spent; the processor must stop.
    Exhausted,
}

/// Retry counter owned by the supervisor loop.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub retry_count: u32,
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryState {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            delay,
        }
    }

    /// Register a failed pass.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.retry_count >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        self.retry_count += 1;
        RetryDecision::Retry(self.delay)
    }

    /// Passes run so far, including the first.
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}
