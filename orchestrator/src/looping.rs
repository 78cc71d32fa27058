//! Per-iteration bookkeeping for agent loops.
//!
//! The host calls [`LoopController::record_iteration`] with each agent turn's
//! output. The verdict comes from the pure [`LoopManager`]; this module persists
//! it, moves the agent's status, and appends the matching workflow events.

use std::fmt;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::config::OrchestrationConfig;
use crate::core::loop_manager::{LoopDecision, LoopManager, LoopOutcome, reset_circuit};
use crate::core::rate_limit::{Clock, RateLimiter, is_rate_limit_error};
use crate::core::types::{AgentLoopState, AgentStatus, WorkflowEventType};
use crate::io::state_store::{AgentPatch, StateManager};

/// Reason given for every stop forced by manual mode.
pub const MANUAL_MODE_REASON: &str = "Manual mode: awaiting operator";

#[derive(Debug)]
pub struct LoopController {
    manager: LoopManager,
    autonomous: bool,
}

impl LoopController {
    pub fn new(manager: LoopManager, autonomous: bool) -> Self {
        Self {
            manager,
            autonomous,
        }
    }

    pub fn from_config(config: &OrchestrationConfig) -> Self {
        Self::new(
            LoopManager::new(config.circuit_breaker),
            config.autonomous_mode,
        )
    }

    pub fn manager(&self) -> &LoopManager {
        &self.manager
    }

    /// Analyze one loop of `output` for `agent_id` and persist the result.
    ///
    /// A trip moves the agent to `circuit_open`; a confirmed exit moves it to
    /// `completed`. Outside autonomous mode the verdict never asks for another
    /// turn.
    pub fn record_iteration(
        &self,
        store: &mut StateManager,
        agent_id: &str,
        output: &str,
    ) -> Result<LoopDecision> {
        let previous = store
            .agent(agent_id)?
            .loop_state
            .clone()
            .unwrap_or_else(|| self.manager.initialize_loop_state());

        let mut decision = self.manager.update_loop_state(&previous, output);
        if !self.autonomous && decision.should_continue {
            decision.should_continue = false;
            decision.reason = MANUAL_MODE_REASON.to_string();
        }

        let status = match decision.outcome {
            outcome if outcome.is_trip() => Some(AgentPatch::status(AgentStatus::CircuitOpen)),
            LoopOutcome::ExitSignal => Some(AgentPatch {
                status: Some(AgentStatus::Completed),
                completed_at: Some(store.timestamp()),
                ..AgentPatch::default()
            }),
            _ => None,
        };
        store.transaction(|tx| {
            tx.update_agent_loop_state(agent_id, decision.loop_state.clone())?;
            tx.increment_loop_metrics(1, decision.outcome.is_trip());
            if let Some(patch) = status {
                tx.update_agent(agent_id, patch)?;
            }
            Ok(())
        })?;

        self.log_decision(store, agent_id, &decision);
        Ok(decision)
    }

    /// Close the agent's circuit, zero its counters, and set it back to running.
    pub fn reset_agent_circuit(
        &self,
        store: &mut StateManager,
        agent_id: &str,
    ) -> Result<AgentLoopState> {
        let current = store
            .agent(agent_id)?
            .loop_state
            .clone()
            .unwrap_or_else(|| self.manager.initialize_loop_state());
        let reset = reset_circuit(&current);
        store.update_agent(
            agent_id,
            AgentPatch {
                status: Some(AgentStatus::Running),
                loop_state: Some(reset.clone()),
                ..AgentPatch::default()
            },
        )?;
        info!(agent_id, "circuit breaker reset");
        let event = store
            .event(
                WorkflowEventType::CircuitBreakerClosed,
                json!({ "loop": reset.current_loop }),
            )
            .for_agent(agent_id);
        store.log_event(&event);
        Ok(reset)
    }

    fn log_decision(&self, store: &StateManager, agent_id: &str, decision: &LoopDecision) {
        let state = &decision.loop_state;
        let loop_number = state.current_loop;

        if decision.outcome.is_trip() {
            warn!(agent_id, loop_number, reason = %decision.reason, "circuit breaker opened");
        } else if decision.should_continue {
            debug!(agent_id, loop_number, reason = %decision.reason, "loop continuing");
        } else {
            info!(agent_id, loop_number, reason = %decision.reason, "loop stopped");
        }

        let mut events = vec![store.event(
            WorkflowEventType::LoopIteration,
            json!({
                "loop": loop_number,
                "shouldContinue": decision.should_continue,
                "reason": decision.reason,
            }),
        )];
        events.push(if decision.progressed {
            store.event(
                WorkflowEventType::ProgressDetected,
                json!({ "loop": loop_number }),
            )
        } else {
            store.event(
                WorkflowEventType::NoProgressDetected,
                json!({
                    "loop": loop_number,
                    "noProgressLoops": state.no_progress_loops,
                    "maxNoProgressLoops": self.manager.config().max_no_progress_loops,
                }),
            )
        });
        if decision.outcome.is_trip() {
            events.push(store.event(
                WorkflowEventType::CircuitBreakerOpen,
                json!({
                    "reason": decision.reason,
                    "noProgressLoops": state.no_progress_loops,
                    "repeatedErrorLoops": state.repeated_error_loops,
                    "lastError": state.last_error,
                }),
            ));
        }
        if decision.outcome == LoopOutcome::ExitSignal {
            events.push(store.event(
                WorkflowEventType::ExitSignalDetected,
                json!({ "completionIndicators": state.completion_indicators }),
            ));
        }

        for event in events {
            store.log_event(&event.for_agent(agent_id));
        }
    }
}

/// Feed an upstream failure to the limiter if it reads as a rate limit.
///
/// On a match the limiter starts its fixed delay, the hit is counted, the
/// limiter state is persisted, and a `rate_limit_hit` event is logged.
pub fn record_rate_limit<C: Clock, E: fmt::Display + ?Sized>(
    store: &mut StateManager,
    limiter: &mut RateLimiter<C>,
    error: &E,
) -> Result<bool> {
    if !is_rate_limit_error(error) {
        return Ok(false);
    }
    limiter.trigger_rate_limit();
    store.increment_rate_limit_hits()?;
    store.save_rate_limit_state(&limiter.state())?;

    let retry_delay_seconds = limiter.config().retry_delay_seconds;
    warn!(retry_delay_seconds, error = %error, "rate limit hit");
    let event = store.event(
        WorkflowEventType::RateLimitHit,
        json!({
            "error": error.to_string(),
            "retryDelaySeconds": retry_delay_seconds,
            "nextRetryAt": limiter.state().next_retry_at,
        }),
    );
    store.log_event(&event);
    Ok(true)
}
