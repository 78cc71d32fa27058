//! Fixed-delay backoff gate for the upstream agent API.
//!
//! The limiter is an explicit instance: callers construct it from config and
//! pass it where it is needed. Time comes from an injected [`Clock`] so the state
//! machine stays deterministic under test. The blocking wait lives in
//! `io::rate_wait`.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::RateLimiterConfig;
use crate::core::patterns::{PatternCatalogue, rate_limit_catalogue};

static RATE_LIMIT_PATTERNS: LazyLock<PatternCatalogue> = LazyLock::new(rate_limit_catalogue);

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persistable limiter bookkeeping (`rate_limit.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitState {
    pub total_attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub waiting_for_retry: bool,
    /// Absolute deadline after which the next attempt is allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retries_count: u32,
}

/// Outcome of [`RateLimiter::check_rate_limit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateCheck {
    pub can_proceed: bool,
    /// Whole seconds left before the next attempt (only when denied).
    pub wait_seconds: Option<u64>,
    pub message: Option<String>,
}

impl RateCheck {
    fn proceed(message: Option<String>) -> Self {
        Self {
            can_proceed: true,
            wait_seconds: None,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    pub total_attempts: u64,
    pub retries_count: u32,
    /// Constant delay once any retry happened, else 0.
    pub average_wait_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    state: RateLimitState,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Self {
        Self {
            config,
            state: RateLimitState::default(),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn is_waiting(&self) -> bool {
        self.state.waiting_for_retry
    }

    /// Decide whether an attempt may proceed now, recording it if so.
    pub fn check_rate_limit(&mut self) -> RateCheck {
        if !self.config.enabled {
            return RateCheck::proceed(None);
        }

        let now = self.clock.now();
        if !self.state.waiting_for_retry {
            self.record_attempt(now);
            return RateCheck::proceed(None);
        }

        match self.remaining_wait_seconds(now) {
            Some(wait_seconds) => RateCheck {
                can_proceed: false,
                wait_seconds: Some(wait_seconds),
                message: Some(format!(
                    "Rate limited. Retrying in {wait_seconds} seconds ({})",
                    format_duration(wait_seconds)
                )),
            },
            None => {
                self.state.waiting_for_retry = false;
                self.state.retries_count += 1;
                self.record_attempt(now);
                RateCheck::proceed(Some(format!(
                    "Retry {} after rate limit",
                    self.state.retries_count
                )))
            }
        }
    }

    /// Upstream reported a rate limit: wait the fixed delay from now.
    pub fn trigger_rate_limit(&mut self) {
        let delay = i64::try_from(self.config.retry_delay_seconds)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX);
        let now = self.clock.now();
        self.state.waiting_for_retry = true;
        self.state.next_retry_at =
            Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    /// True iff a finite retry ceiling is configured and reached.
    pub fn should_stop_retrying(&self) -> bool {
        match self.config.retry_ceiling() {
            Some(max) => self.state.retries_count >= max,
            None => false,
        }
    }

    /// Snapshot for persistence.
    pub fn state(&self) -> RateLimitState {
        self.state.clone()
    }

    /// Restore a snapshot taken by [`RateLimiter::state`].
    pub fn restore(&mut self, state: RateLimitState) {
        self.state = state;
    }

    pub fn reset(&mut self) {
        self.state = RateLimitState::default();
    }

    /// Pending wait message, without recording anything.
    pub fn countdown_message(&self) -> Option<String> {
        if !self.config.enabled || !self.state.waiting_for_retry {
            return None;
        }
        self.remaining_wait_seconds(self.clock.now()).map(|wait_seconds| {
            format!(
                "Rate limited. Retrying in {wait_seconds} seconds ({})",
                format_duration(wait_seconds)
            )
        })
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            total_attempts: self.state.total_attempts,
            retries_count: self.state.retries_count,
            average_wait_seconds: if self.state.retries_count > 0 {
                self.config.retry_delay_seconds
            } else {
                0
            },
        }
    }

    fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.state.total_attempts += 1;
        self.state.last_attempt_at = Some(now);
    }

    /// Seconds (rounded up) until the deadline, or `None` once it passed.
    /// A waiting state without a deadline is treated as already due.
    fn remaining_wait_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let deadline = self.state.next_retry_at?;
        let remaining_ms = (deadline - now).num_milliseconds();
        if remaining_ms <= 0 {
            return None;
        }
        Some((remaining_ms as u64).div_ceil(1000))
    }
}

/// `45s`, `2m`, `2m 5s`, `1h`, `1h 1m`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    let remaining_seconds = seconds % 60;
    if minutes < 60 {
        return if remaining_seconds > 0 {
            format!("{minutes}m {remaining_seconds}s")
        } else {
            format!("{minutes}m")
        };
    }
    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    if remaining_minutes > 0 {
        format!("{hours}h {remaining_minutes}m")
    } else {
        format!("{hours}h")
    }
}

/// Test an error's rendered text against the rate-limit phrase catalogue.
pub fn is_rate_limit_error<E: fmt::Display + ?Sized>(error: &E) -> bool {
    let text = format!("{error:#}").to_lowercase();
    RATE_LIMIT_PATTERNS.is_match(&text)
}

/// Same check for structured error payloads, matched against their JSON text.
pub fn is_rate_limit_payload(payload: &Value) -> bool {
    if payload.is_null() {
        return false;
    }
    RATE_LIMIT_PATTERNS.is_match(&payload.to_string().to_lowercase())
}
