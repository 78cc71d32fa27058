//! Durable orchestration state (`.claude/state/`).
//!
//! [`StateManager`] owns the single mutable [`OrchestrationState`]. Every
//! mutator runs as a [`StateManager::transaction`]: it patches a draft, rewrites
//! the root document plus the derived `agents.json` / `tasks.json` views, and
//! only then commits the draft in memory. Writes are atomic per
//! document, but there is no cross-process locking: exactly one process may
//! write a given state directory at a time.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::atomic::write_atomic;
use super::event_log::{append_event, read_events};
use super::paths::StatePaths;
use crate::core::config::OrchestrationConfig;
use crate::core::rate_limit::{Clock, RateLimitState, SystemClock};
use crate::core::types::{
    AgentLoopState, AgentState, AgentStatus, CiStatus, OrchestrationMetrics, OrchestrationState,
    OrchestrationStatus, TaskState, WorkflowEvent, WorkflowEventType,
};
use crate::error::OrchestratorError;

/// Root-level fields to overwrite; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub phase: Option<String>,
    pub epic_id: Option<String>,
    pub status: Option<OrchestrationStatus>,
    pub config: Option<OrchestrationConfig>,
    pub metrics: Option<OrchestrationMetrics>,
}

/// Agent fields to overwrite; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub task_id: Option<String>,
    pub assigned_at: Option<String>,
    pub completed_at: Option<String>,
    pub token_usage: Option<u64>,
    pub error: Option<String>,
    pub output_file: Option<String>,
    pub loop_state: Option<AgentLoopState>,
}

impl AgentPatch {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn apply(self, agent: &mut AgentState) {
        if let Some(status) = self.status {
            agent.status = status;
        }
        if let Some(task_id) = self.task_id {
            agent.task_id = Some(task_id);
        }
        if let Some(assigned_at) = self.assigned_at {
            agent.assigned_at = Some(assigned_at);
        }
        if let Some(completed_at) = self.completed_at {
            agent.completed_at = Some(completed_at);
        }
        if let Some(token_usage) = self.token_usage {
            agent.token_usage = token_usage;
        }
        if let Some(error) = self.error {
            agent.error = Some(error);
        }
        if let Some(output_file) = self.output_file {
            agent.output_file = Some(output_file);
        }
        if let Some(loop_state) = self.loop_state {
            agent.loop_state = Some(loop_state);
        }
    }
}

/// Task fields to overwrite; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub pr_number: Option<u64>,
    pub ci_status: Option<CiStatus>,
    pub review_loops: Option<u32>,
    pub token_estimate: Option<u64>,
}

impl TaskPatch {
    fn apply(self, task: &mut TaskState) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(assignee) = self.assignee {
            task.assignee = Some(assignee);
        }
        if let Some(pr_number) = self.pr_number {
            task.pr_number = Some(pr_number);
        }
        if let Some(ci_status) = self.ci_status {
            task.ci_status = Some(ci_status);
        }
        if let Some(review_loops) = self.review_loops {
            task.review_loops = review_loops;
        }
        if let Some(token_estimate) = self.token_estimate {
            task.token_estimate = Some(token_estimate);
        }
    }
}

/// Single source of truth for one project's orchestration state.
pub struct StateManager {
    paths: StatePaths,
    config: OrchestrationConfig,
    clock: Box<dyn Clock + Send + Sync>,
    state: Option<OrchestrationState>,
}

impl StateManager {
    /// Manager for `<root>/.claude/state/`. Nothing is read until
    /// [`StateManager::initialize`] or [`StateManager::load`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: StatePaths::new(root),
            config: OrchestrationConfig::default(),
            clock: Box::new(SystemClock),
            state: None,
        }
    }

    /// Config used whenever a fresh default state is created. Rejected when
    /// it fails [`OrchestrationConfig::validate`].
    pub fn with_config(mut self, config: OrchestrationConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Current time as an RFC 3339 UTC timestamp with milliseconds.
    pub fn timestamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Ensure the state directory exists, then load existing state or create
    /// and persist a fresh one.
    pub fn initialize(&mut self) -> Result<()> {
        let state_dir = &self.paths.state_dir;
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create state directory {}", state_dir.display()))?;
        if self.paths.state_path.exists() {
            self.load()?;
        } else {
            self.create_initial_state()?;
        }
        Ok(())
    }

    /// Read the root document. Any read, parse, or config validation failure is
    /// logged and replaced by a freshly created default state.
    pub fn load(&mut self) -> Result<&OrchestrationState> {
        let path = &self.paths.state_path;
        debug!(path = %path.display(), "loading orchestration state");
        let loaded = fs::read_to_string(path)
            .with_context(|| format!("read state {}", path.display()))
            .and_then(|contents| {
                serde_json::from_str::<OrchestrationState>(&contents)
                    .with_context(|| format!("parse state {}", path.display()))
            })
            .and_then(|state| {
                state
                    .config
                    .validate()
                    .with_context(|| format!("validate config in {}", path.display()))?;
                Ok(state)
            });
        match loaded {
            Ok(state) => {
                debug!(
                    agents = state.agents.len(),
                    tasks = state.tasks.len(),
                    "orchestration state loaded"
                );
                self.state = Some(state);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to load state, recreating defaults");
                self.create_initial_state()?;
            }
        }
        self.state()
    }

    /// Write the root document and the derived agent and task views.
    pub fn save(&self) -> Result<()> {
        self.write_documents(self.state()?)
    }

    pub fn state(&self) -> Result<&OrchestrationState> {
        Ok(self
            .state
            .as_ref()
            .ok_or(OrchestratorError::NotInitialized)?)
    }

    pub fn agent(&self, agent_id: &str) -> Result<&AgentState> {
        let state = self.state()?;
        Ok(state
            .agents
            .iter()
            .find(|agent| agent.id == agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound {
                id: agent_id.to_string(),
            })?)
    }

    pub fn task(&self, task_id: &str) -> Result<&TaskState> {
        let state = self.state()?;
        Ok(state
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })?)
    }

    /// Apply several changes as one unit and save once.
    ///
    /// `apply` edits a draft copy. The draft replaces the current state only
    /// after it has been written, so an error from `apply` or from the save
    /// leaves the in-memory state untouched.
    pub fn transaction<T>(
        &mut self,
        apply: impl FnOnce(&mut StateTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut draft = self.state()?.clone();
        let value = apply(&mut StateTransaction { state: &mut draft })?;
        self.write_documents(&draft)?;
        self.state = Some(draft);
        Ok(value)
    }

    pub fn update_state(&mut self, patch: StatePatch) -> Result<()> {
        if let Some(config) = &patch.config {
            config.validate()?;
        }
        self.transaction(|tx| {
            tx.update_state(patch);
            Ok(())
        })
    }

    pub fn add_agent(&mut self, agent: AgentState) -> Result<()> {
        self.transaction(|tx| {
            tx.add_agent(agent);
            Ok(())
        })
    }

    pub fn update_agent(&mut self, agent_id: &str, patch: AgentPatch) -> Result<()> {
        self.transaction(|tx| tx.update_agent(agent_id, patch))
    }

    pub fn add_task(&mut self, task: TaskState) -> Result<()> {
        self.transaction(|tx| {
            tx.add_task(task);
            Ok(())
        })
    }

    /// Patch a task. The first transition into `closed` counts the task as
    /// completed and refreshes the rolling averages.
    pub fn update_task(&mut self, task_id: &str, patch: TaskPatch) -> Result<()> {
        self.transaction(|tx| tx.update_task(task_id, patch))
    }

    /// Set the agent's usage to `tokens` and add `tokens` to the session total.
    pub fn update_token_usage(&mut self, agent_id: &str, tokens: u64) -> Result<()> {
        self.transaction(|tx| tx.update_token_usage(agent_id, tokens))
    }

    pub fn update_agent_loop_state(
        &mut self,
        agent_id: &str,
        loop_state: AgentLoopState,
    ) -> Result<()> {
        self.transaction(|tx| tx.update_agent_loop_state(agent_id, loop_state))
    }

    pub fn increment_loop_metrics(&mut self, loops: u64, circuit_trip: bool) -> Result<()> {
        self.transaction(|tx| {
            tx.increment_loop_metrics(loops, circuit_trip);
            Ok(())
        })
    }

    pub fn increment_rate_limit_hits(&mut self) -> Result<()> {
        self.transaction(|tx| {
            tx.increment_rate_limit_hits();
            Ok(())
        })
    }

    /// Build an event stamped with the current time.
    pub fn event(&self, event_type: WorkflowEventType, data: Value) -> WorkflowEvent {
        WorkflowEvent::new(event_type, self.timestamp(), data)
    }

    /// Append to the event log. Best effort: failures are logged, never returned.
    pub fn log_event(&self, event: &WorkflowEvent) {
        if let Err(err) = append_event(&self.paths.events_path, event) {
            warn!(
                event_type = ?event.event_type,
                error = %format!("{err:#}"),
                "failed to log event"
            );
        }
    }

    pub fn read_events(&self) -> Result<Vec<WorkflowEvent>> {
        read_events(&self.paths.events_path)
    }

    /// Agents occupying a parallel slot (spawning, running, or waiting).
    pub fn active_agents(&self) -> Result<Vec<&AgentState>> {
        Ok(self
            .state()?
            .agents
            .iter()
            .filter(|agent| agent.status.is_active())
            .collect())
    }

    /// Configured maximum minus active agents, floored at zero.
    pub fn available_agent_slots(&self) -> Result<usize> {
        let max_agents = self.state()?.config.agent_ceiling();
        Ok(max_agents.saturating_sub(self.active_agents()?.len()))
    }

    pub fn circuit_open_agents(&self) -> Result<Vec<&AgentState>> {
        Ok(self
            .state()?
            .agents
            .iter()
            .filter(|agent| agent.circuit_is_open())
            .collect())
    }

    /// Discard everything and persist a fresh default state.
    pub fn reset(&mut self) -> Result<()> {
        self.create_initial_state()
    }

    pub fn save_rate_limit_state(&self, rate_limit: &RateLimitState) -> Result<()> {
        write_json(&self.paths.rate_limit_path, rate_limit)
    }

    /// Persisted limiter state, or `None` when none was saved yet.
    pub fn load_rate_limit_state(&self) -> Result<Option<RateLimitState>> {
        let path = &self.paths.rate_limit_path;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read rate limit state {}", path.display()))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parse rate limit state {}", path.display()))?;
        Ok(Some(state))
    }

    fn create_initial_state(&mut self) -> Result<()> {
        debug!(path = %self.paths.state_path.display(), "creating initial state");
        self.state = Some(OrchestrationState::new(
            self.config.clone(),
            self.timestamp(),
        ));
        self.save()
    }

    fn write_documents(&self, state: &OrchestrationState) -> Result<()> {
        write_json(&self.paths.state_path, state)?;
        write_json(&self.paths.agents_path, &state.agents)?;
        write_json(&self.paths.tasks_path, &state.tasks)?;
        Ok(())
    }
}

/// Draft of the state inside [`StateManager::transaction`].
pub struct StateTransaction<'a> {
    state: &'a mut OrchestrationState,
}

impl StateTransaction<'_> {
    pub fn state(&self) -> &OrchestrationState {
        &*self.state
    }

    pub fn update_state(&mut self, patch: StatePatch) {
        let state = &mut *self.state;
        if let Some(phase) = patch.phase {
            state.phase = phase;
        }
        if let Some(epic_id) = patch.epic_id {
            state.epic_id = Some(epic_id);
        }
        if let Some(status) = patch.status {
            state.status = status;
        }
        if let Some(config) = patch.config {
            state.config = config;
        }
        if let Some(metrics) = patch.metrics {
            state.metrics = metrics;
        }
    }

    pub fn add_agent(&mut self, agent: AgentState) {
        debug!(agent_id = %agent.id, skill = %agent.skill_name, "adding agent");
        self.state.agents.push(agent);
        self.state.metrics.total_agents_spawned += 1;
    }

    pub fn update_agent(&mut self, agent_id: &str, patch: AgentPatch) -> Result<()> {
        patch.apply(self.agent_mut(agent_id)?);
        Ok(())
    }

    pub fn add_task(&mut self, task: TaskState) {
        debug!(task_id = %task.id, "adding task");
        self.state.tasks.push(task);
    }

    pub fn update_task(&mut self, task_id: &str, patch: TaskPatch) -> Result<()> {
        let state = &mut *self.state;
        let task = state
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        let was_closed = task.is_closed();
        patch.apply(task);

        if !was_closed && task.is_closed() {
            debug!(task_id, "task closed");
            state.metrics.total_tasks_completed += 1;
            let (closed, review_loops) = state
                .tasks
                .iter()
                .filter(|task| task.is_closed())
                .fold((0u64, 0u64), |(count, loops), task| {
                    (count + 1, loops + u64::from(task.review_loops))
                });
            state.metrics.average_review_loops = review_loops as f64 / closed as f64;
            refresh_loop_average(&mut state.metrics);
        }
        Ok(())
    }

    pub fn update_token_usage(&mut self, agent_id: &str, tokens: u64) -> Result<()> {
        let threshold = self.state.config.token_warning_threshold;
        self.agent_mut(agent_id)?.token_usage = tokens;
        self.state.metrics.total_tokens_used += tokens;
        if tokens >= threshold {
            warn!(agent_id, tokens, threshold, "agent near its token budget");
        }
        Ok(())
    }

    pub fn update_agent_loop_state(
        &mut self,
        agent_id: &str,
        loop_state: AgentLoopState,
    ) -> Result<()> {
        self.agent_mut(agent_id)?.loop_state = Some(loop_state);
        Ok(())
    }

    pub fn increment_loop_metrics(&mut self, loops: u64, circuit_trip: bool) {
        let metrics = &mut self.state.metrics;
        metrics.total_loops += loops;
        if circuit_trip {
            metrics.circuit_breaker_trips += 1;
        }
        refresh_loop_average(metrics);
    }

    pub fn increment_rate_limit_hits(&mut self) {
        self.state.metrics.rate_limit_hits += 1;
    }

    fn agent_mut(&mut self, agent_id: &str) -> Result<&mut AgentState> {
        Ok(self
            .state
            .agents
            .iter_mut()
            .find(|agent| agent.id == agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound {
                id: agent_id.to_string(),
            })?)
    }
}

fn refresh_loop_average(metrics: &mut OrchestrationMetrics) {
    metrics.average_loops_per_task = if metrics.total_tasks_completed == 0 {
        0.0
    } else {
        metrics.total_loops as f64 / metrics.total_tasks_completed as f64
    };
}

fn write_json<T: Serialize + ?Sized>(path: &std::path::Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}
