//! Bounded, fixed-interval retry.
//!
//! Attempt 0 is the initial try; `max_attempts` counts retries only, so a
//! target is tried at most `max_attempts + 1` times. The interval is constant.

use std::future::Future;
use std::time::Duration;

use datasync_core::RetryOverride;

/// Retry limits for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u8, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Exactly one try, no retries.
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Drive `action` until it reports success or the retries run out.
    ///
    /// `action` receives the attempt number (0 for the initial try). There is
    /// no sleep before the first try nor after the last failed one. Exhaustion
    /// is logged and returned, never raised.
    pub async fn run<F, Fut>(&self, label: &str, mut action: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut state = RetryState::new(*self);
        loop {
            if action(state.attempt()).await {
                return RetryOutcome::Succeeded {
                    attempts: state.tries(),
                };
            }
            if !state.advance() {
                break;
            }
            tracing::debug!(
                service = label,
                attempt = state.attempt(),
                max = self.max_attempts,
                interval_secs = self.interval.as_secs(),
                "scheduling retry",
            );
            tokio::time::sleep(self.interval).await;
        }

        tracing::error!(
            service = label,
            attempts = state.tries(),
            max = self.max_attempts,
            "all retries exhausted",
        );
        RetryOutcome::Exhausted {
            attempts: state.tries(),
        }
    }
}

impl From<RetryOverride> for RetryPolicy {
    fn from(retry: RetryOverride) -> Self {
        Self::new(retry.attempts, retry.interval)
    }
}

/// Per-target attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    policy: RetryPolicy,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { attempt: 0, policy }
    }

    /// Current attempt number; 0 is the initial try.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Tries made so far, counting the current one.
    pub fn tries(&self) -> u32 {
        self.attempt + 1
    }

    /// Move to the next attempt. Returns `false` once the retries are used up.
    pub fn advance(&mut self) -> bool {
        if self.attempt >= u32::from(self.policy.max_attempts) {
            return false;
        }
        self.attempt += 1;
        true
    }
}

/// How one target's notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts } | RetryOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}
