//! Orchestration policy values shared by every component.
//!
//! The config is immutable for the duration of a session. Field names are
//! serialized in camelCase because the persisted state document is also read by
//! external hook scripts.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// System-wide ceiling on concurrently active agents.
pub const MAX_PARALLEL_AGENTS: u32 = 7;

/// Session policy (`config` in the root state document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestrationConfig {
    /// Hard ceiling on active agents (never above [`MAX_PARALLEL_AGENTS`]).
    pub max_parallel_agents: u32,
    pub max_code_review_loops: u32,
    pub max_tokens_per_agent: u64,
    /// Usage at which an agent is considered close to its budget.
    pub token_warning_threshold: u64,
    /// Restart automatically when a phase completes.
    pub auto_restart: bool,
    /// Await operator approval between phases.
    pub human_approval_required: bool,
    /// When false, loop verdicts never schedule another turn on their own.
    pub autonomous_mode: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub max_no_progress_loops: u32,
    pub max_repeated_error_loops: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimiterConfig {
    pub enabled: bool,
    /// Fixed delay between retries; there is no exponential backoff.
    pub retry_delay_seconds: u64,
    /// `-1` means unlimited retries.
    pub max_retries: i64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: MAX_PARALLEL_AGENTS,
            max_code_review_loops: 50,
            max_tokens_per_agent: 200_000,
            token_warning_threshold: 160_000,
            auto_restart: false,
            human_approval_required: true,
            autonomous_mode: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_no_progress_loops: 5,
            max_repeated_error_loops: 10,
            enabled: true,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_delay_seconds: 60,
            max_retries: -1,
        }
    }
}

impl RateLimiterConfig {
    /// Finite retry ceiling, or `None` when retries are unlimited.
    pub fn retry_ceiling(&self) -> Option<u32> {
        u32::try_from(self.max_retries).ok()
    }
}

impl OrchestrationConfig {
    /// Active-agent limit actually enforced, clamped to [`MAX_PARALLEL_AGENTS`]
    /// whatever the document says.
    pub fn agent_ceiling(&self) -> usize {
        self.max_parallel_agents.min(MAX_PARALLEL_AGENTS) as usize
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let invalid = |msg: String| Err(OrchestratorError::InvalidConfig(msg));

        if self.max_parallel_agents == 0 || self.max_parallel_agents > MAX_PARALLEL_AGENTS {
            return invalid(format!(
                "maxParallelAgents must be between 1 and {MAX_PARALLEL_AGENTS} (got {})",
                self.max_parallel_agents
            ));
        }
        if self.max_code_review_loops == 0 {
            return invalid("maxCodeReviewLoops must be > 0".to_string());
        }
        if self.token_warning_threshold > self.max_tokens_per_agent {
            return invalid(format!(
                "tokenWarningThreshold {} exceeds maxTokensPerAgent {}",
                self.token_warning_threshold, self.max_tokens_per_agent
            ));
        }
        if self.circuit_breaker.max_no_progress_loops == 0 {
            return invalid("circuitBreaker.maxNoProgressLoops must be > 0".to_string());
        }
        if self.circuit_breaker.max_repeated_error_loops == 0 {
            return invalid("circuitBreaker.maxRepeatedErrorLoops must be > 0".to_string());
        }
        if self.rate_limiter.max_retries < -1 {
            return invalid(format!(
                "rateLimiter.maxRetries must be -1 (unlimited) or >= 0 (got {})",
                self.rate_limiter.max_retries
            ));
        }
        Ok(())
    }
}
