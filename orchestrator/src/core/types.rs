//! Orchestration data model.
//!
//! These types define the persisted document layout (`orchestration.json`,
//! `agents.json`, `tasks.json`, `events.jsonl`). Field names are camelCase so the
//! files stay compatible with the external hook scripts that read them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::OrchestrationConfig;

/// Document schema version written into fresh states.
pub const STATE_VERSION: &str = "1.0.0";

/// Terminal task status in the external issue tracker.
pub const TASK_STATUS_CLOSED: &str = "closed";
/// Status given to tasks registered from an execution plan.
pub const TASK_STATUS_OPEN: &str = "open";

/// Root aggregate, owned exclusively by the state manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationState {
    pub version: String,
    pub started_at: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    pub status: OrchestrationStatus,
    #[serde(default)]
    pub config: OrchestrationConfig,
    #[serde(default)]
    pub agents: Vec<AgentState>,
    #[serde(default)]
    pub tasks: Vec<TaskState>,
    #[serde(default)]
    pub metrics: OrchestrationMetrics,
}

impl OrchestrationState {
    /// Fresh idle state using `config`.
    pub fn new(config: OrchestrationConfig, started_at: String) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            started_at,
            phase: "idle".to_string(),
            epic_id: None,
            status: OrchestrationStatus::Idle,
            config,
            agents: Vec::new(),
            tasks: Vec::new(),
            metrics: OrchestrationMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    Idle,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Spawning,
    Running,
    Waiting,
    Completed,
    Error,
    CircuitOpen,
}

impl AgentStatus {
    /// Agents in these states occupy a parallel slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AgentStatus::Running | AgentStatus::Waiting | AgentStatus::Spawning
        )
    }
}

/// One spawned worker. Never deleted, only terminalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: String,
    /// Worker kind (`pm`, `frontend`, `general-purpose`, ...).
    pub agent_type: String,
    pub skill_name: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub token_usage: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_state: Option<AgentLoopState>,
}

impl AgentState {
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        skill_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            skill_name: skill_name.into(),
            status: AgentStatus::Spawning,
            task_id: None,
            assigned_at: None,
            completed_at: None,
            token_usage: 0,
            error: None,
            output_file: None,
            loop_state: None,
        }
    }

    pub fn circuit_is_open(&self) -> bool {
        self.loop_state
            .as_ref()
            .is_some_and(|loop_state| loop_state.circuit_state == CircuitState::Open)
    }
}

/// Circuit breaker position for one agent's loop.
///
/// `HalfOpen` is part of the persisted vocabulary but no transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Per-agent loop counters maintained by the loop manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentLoopState {
    pub current_loop: u32,
    /// Consecutive loops without a new progress fingerprint.
    pub no_progress_loops: u32,
    /// Consecutive loops reporting the same error signature.
    pub repeated_error_loops: u32,
    /// Fingerprint of the last output that counted as progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_progress: Option<String>,
    /// Pipe-joined error signature of the last failing output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub circuit_state: CircuitState,
    pub exit_signal: bool,
    #[serde(default)]
    pub completion_indicators: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Pending,
    Running,
    Success,
    Failure,
}

/// A unit of work tracked by the external issue tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    /// Tracker id (for example `bd-12`).
    pub id: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub title: String,
    /// Tracker status; [`TASK_STATUS_CLOSED`] is terminal.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<CiStatus>,
    #[serde(default)]
    pub review_loops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_estimate: Option<u64>,
}

impl TaskState {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: "task".to_string(),
            title: title.into(),
            status: TASK_STATUS_OPEN.to_string(),
            assignee: None,
            pr_number: None,
            ci_status: None,
            review_loops: 0,
            token_estimate: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TASK_STATUS_CLOSED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestrationMetrics {
    pub total_agents_spawned: u64,
    pub total_tasks_completed: u64,
    pub total_tokens_used: u64,
    pub average_review_loops: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_completed_at: Option<String>,
    pub total_loops: u64,
    pub circuit_breaker_trips: u64,
    pub rate_limit_hits: u64,
    pub average_loops_per_task: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    TaskAssigned,
    TaskCompleted,
    PrCreated,
    PrMerged,
    CiCompleted,
    ReviewCompleted,
    AgentSpawned,
    AgentCompleted,
    Error,
    LoopIteration,
    CircuitBreakerOpen,
    CircuitBreakerClosed,
    RateLimitHit,
    ExitSignalDetected,
    ProgressDetected,
    NoProgressDetected,
}

/// Append-only record in `events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: WorkflowEventType,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventType, timestamp: String, data: Value) -> Self {
        Self {
            event_type,
            timestamp,
            agent_id: None,
            task_id: None,
            data,
        }
    }

    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}
