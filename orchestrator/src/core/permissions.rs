//! Allow/deny decisions for agent spawns and shell commands.
//!
//! Decisions render to the pre-tool-use hook JSON contract so the host runtime
//! can enforce them without re-deriving the reason.

use std::sync::LazyLock;

use serde_json::{Value, json};

use crate::core::patterns::{PatternCatalogue, dangerous_command_catalogue};
use crate::core::types::{OrchestrationState, OrchestrationStatus};

static DANGEROUS_COMMANDS: LazyLock<PatternCatalogue> =
    LazyLock::new(dangerous_command_catalogue);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }

    /// Hook output for a denial; `None` means "allow" (emit nothing).
    pub fn to_hook_output(&self) -> Option<Value> {
        match self {
            PermissionDecision::Allow => None,
            PermissionDecision::Deny { reason } => Some(json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": reason,
                }
            })),
        }
    }
}

/// Whether one more agent may be spawned right now.
pub fn check_spawn_permission(state: &OrchestrationState) -> PermissionDecision {
    check_spawn_batch(state, 1)
}

/// Whether `count` agents may be spawned together.
pub fn check_spawn_batch(state: &OrchestrationState, count: usize) -> PermissionDecision {
    if state.status == OrchestrationStatus::Paused {
        return PermissionDecision::Deny {
            reason: "Orchestration is paused. Resume orchestration before spawning agents."
                .to_string(),
        };
    }

    let max_agents = state.config.agent_ceiling();
    let active = state
        .agents
        .iter()
        .filter(|agent| agent.status.is_active())
        .count();
    if active + count > max_agents {
        let reason = if count == 1 {
            format!(
                "Maximum parallel agents ({max_agents}) reached. Currently active: {active}. Wait for agents to complete."
            )
        } else {
            format!(
                "Cannot spawn {count} agents: maximum parallel agents ({max_agents}) with {active} currently active. Wait for agents to complete."
            )
        };
        return PermissionDecision::Deny { reason };
    }

    PermissionDecision::Allow
}

/// Refuse shell commands from the dangerous-command catalogue.
pub fn check_command(command: &str) -> PermissionDecision {
    match DANGEROUS_COMMANDS.matches(command).into_iter().next() {
        Some(found) => PermissionDecision::Deny {
            reason: format!(
                "Dangerous command detected: {}. Command blocked for safety.",
                found.matcher
            ),
        },
        None => PermissionDecision::Allow,
    }
}
