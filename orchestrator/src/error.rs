//! Typed failure conditions.
//!
//! Fallible operations return `anyhow::Result`; these values travel inside the
//! `anyhow::Error` so callers can branch on the condition with
//! `err.downcast_ref::<OrchestratorError>()`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// State accessed before `initialize()`/`load()` populated it.
    #[error("state not initialized")]
    NotInitialized,

    #[error("agent {id} not found")]
    AgentNotFound { id: String },

    #[error("task {id} not found")]
    TaskNotFound { id: String },

    /// No sub-skill became ready while planning execution waves.
    #[error("deadlock detected: no skills are ready to execute (pending: {})", pending.join(", "))]
    Deadlock { pending: Vec<String> },

    #[error("skill composition '{name}' is invalid: {}", errors.join("; "))]
    InvalidComposition { name: String, errors: Vec<String> },

    #[error("max retries ({max_retries}) exceeded, stopping")]
    RetriesExhausted { max_retries: i64 },

    #[error("rate limit wait cancelled")]
    WaitCancelled,

    #[error("rate limit wait exceeded its deadline")]
    WaitDeadlineExceeded,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("wave {index} not found in execution plan ({waves} waves)")]
    WaveNotFound { index: usize, waves: usize },
}

impl OrchestratorError {
    /// True for lookups that failed because an id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::AgentNotFound { .. } | OrchestratorError::TaskNotFound { .. }
        )
    }
}
