//! Retry decisions with exponential backoff.
//!
//! Everything here is pure: the fetcher feeds in the attempt number and the
//! kind of failure and gets back what to do next. No clocks, no I/O.

use std::time::Duration;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SessionStart,
    Navigation,
    PageCrash,
    ElementNotFound,
}

impl From<&SessionError> for FailureKind {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::SessionStart(_) => FailureKind::SessionStart,
            SessionError::Navigation { .. } => FailureKind::Navigation,
            SessionError::PageCrash(_) => FailureKind::PageCrash,
            SessionError::ElementNotFound { .. } => FailureKind::ElementNotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per target, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive render timeouts that trigger a session restart (0 = never)
    pub restart_after_not_found: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            restart_after_not_found: 3,
        }
    }
}

impl RetryPolicy {
    /// Zero delays, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match kind {
            // a fresh renderer is already in place, no reason to wait
            FailureKind::PageCrash => RetryDecision::Retry { delay: Duration::ZERO },
            FailureKind::SessionStart | FailureKind::Navigation | FailureKind::ElementNotFound => {
                RetryDecision::Retry { delay: self.backoff(attempt) }
            }
        }
    }

    /// Whether the browser should be relaunched after this failure. Render
    /// timeouts restart it at most once per fetch.
    pub fn needs_restart(&self, kind: FailureKind, consecutive_not_found: u32, restarted_this_fetch: bool) -> bool {
        match kind {
            FailureKind::PageCrash | FailureKind::SessionStart => true,
            FailureKind::ElementNotFound => {
                !restarted_this_fetch
                    && self.restart_after_not_found > 0
                    && consecutive_not_found >= self.restart_after_not_found
            }
            FailureKind::Navigation => false,
        }
    }
}
