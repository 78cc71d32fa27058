//! Blocking wait for the rate limiter to admit the next attempt.
//!
//! The wait polls on a fixed tick rather than sleeping until the deadline, so
//! cancellation and an overall deadline are noticed within one tick.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::rate_limit::{Clock, RateCheck, RateLimiter};
use crate::error::OrchestratorError;

/// Blocks the calling thread between polls.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real sleeps via [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<F: Fn(Duration)> Sleeper for F {
    fn sleep(&self, duration: Duration) {
        self(duration);
    }
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Interval between limiter checks.
    pub tick: Duration,
    /// Abort the wait once this token is cancelled.
    pub cancel: Option<CancellationToken>,
    /// Abort the wait once this instant has passed.
    pub deadline: Option<Instant>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            cancel: None,
            deadline: None,
        }
    }
}

/// Poll `limiter` until it admits an attempt.
///
/// Fails with [`OrchestratorError::RetriesExhausted`] when a finite retry
/// ceiling is reached, and with [`OrchestratorError::WaitCancelled`] /
/// [`OrchestratorError::WaitDeadlineExceeded`] when the caller gives up.
pub fn wait_for_rate_limit<C: Clock>(
    limiter: &mut RateLimiter<C>,
    sleeper: &impl Sleeper,
    options: &WaitOptions,
) -> Result<RateCheck> {
    let mut announced = false;
    loop {
        let check = limiter.check_rate_limit();
        if check.can_proceed {
            if let Some(message) = &check.message {
                debug!(message = %message, "rate limit cleared");
            }
            return Ok(check);
        }

        if limiter.should_stop_retrying() {
            let max_retries = limiter.config().max_retries;
            warn!(max_retries, "rate limit retries exhausted");
            return Err(OrchestratorError::RetriesExhausted { max_retries }.into());
        }
        if options
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(OrchestratorError::WaitCancelled.into());
        }
        if options
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(OrchestratorError::WaitDeadlineExceeded.into());
        }

        if let Some(message) = &check.message {
            if announced {
                debug!(wait_seconds = ?check.wait_seconds, "{message}");
            } else {
                warn!(wait_seconds = ?check.wait_seconds, "{message}");
                announced = true;
            }
        }
        sleeper.sleep(options.tick);
    }
}
