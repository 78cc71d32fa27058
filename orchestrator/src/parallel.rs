//! Composition -> validated plan -> spawn specs -> recorded tasks and agents.
//!
//! Nothing here invokes a model. The plan tells the host which workers may run
//! together; [`register_wave`] records a wave's workers once the host is about
//! to submit the whole wave in one message.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::composition::{
    ExecutionMode, SkillComposition, SubSkillDefinition, estimate_composition_tokens,
    validate_skill_composition,
};
use crate::core::config::MAX_PARALLEL_AGENTS;
use crate::core::permissions::{PermissionDecision, check_spawn_batch};
use crate::core::planner::plan_execution_order;
use crate::core::types::{AgentState, TaskState, WorkflowEventType};
use crate::error::OrchestratorError;
use crate::io::prompt::{render_parallel_spawn_prompt, render_sub_skill_prompt};
use crate::io::state_store::{StateManager, TaskPatch};

/// Worker type every sub-skill is spawned as.
pub const WORKER_AGENT_TYPE: &str = "general-purpose";

/// Model hint passed through to the invocation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Sonnet,
    Opus,
    Haiku,
}

/// One worker invocation, in the invocation layer's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelTaskSpec {
    pub subagent_type: String,
    pub description: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTier>,
    #[serde(default)]
    pub run_in_background: bool,
}

impl ParallelTaskSpec {
    /// Background general-purpose worker on the default model tier.
    pub fn worker(description: impl Into<String>, prompt: String) -> Self {
        Self {
            subagent_type: WORKER_AGENT_TYPE.to_string(),
            description: description.into(),
            prompt,
            model: Some(ModelTier::Sonnet),
            run_in_background: true,
        }
    }
}

/// What every worker of a composition is told about the surrounding work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_context: Option<Value>,
}

/// One spec per sub-skill, in input order.
pub fn generate_parallel_task_specs(
    sub_skills: &[SubSkillDefinition],
    context: &TaskContext,
) -> Result<Vec<ParallelTaskSpec>> {
    sub_skills
        .iter()
        .map(|skill| {
            let prompt = render_sub_skill_prompt(skill, context)?;
            Ok(ParallelTaskSpec::worker(
                format!("Execute {}: {}", skill.skill_name, skill.role),
                prompt,
            ))
        })
        .collect()
}

pub fn generate_parallel_spawn_prompt(specs: &[ParallelTaskSpec]) -> Result<String> {
    render_parallel_spawn_prompt(specs)
}

/// A group of sub-skills that may all be spawned together.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWave {
    pub index: usize,
    pub sub_skills: Vec<SubSkillDefinition>,
    pub specs: Vec<ParallelTaskSpec>,
    pub spawn_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub composition: String,
    pub execution_mode: ExecutionMode,
    pub waves: Vec<PlannedWave>,
    pub total_token_estimate: u64,
}

impl ExecutionPlan {
    /// Tracker id recorded for a sub-skill of this plan.
    pub fn task_id(&self, skill: &SubSkillDefinition) -> String {
        format!("{}/{}", self.composition, skill.skill_name)
    }
}

/// Validate `composition` and lay it out as waves of spawn specs.
///
/// Dependency waves come from [`plan_execution_order`]. `sequential`
/// compositions then run one sub-skill per wave; other modes split any wave
/// larger than `maxParallel` (capped at the system limit) into consecutive
/// chunks.
pub fn build_execution_plan(
    composition: &SkillComposition,
    context: &TaskContext,
) -> Result<ExecutionPlan> {
    let validation = validate_skill_composition(composition);
    if !validation.valid {
        return Err(OrchestratorError::InvalidComposition {
            name: composition.name.clone(),
            errors: validation.errors,
        }
        .into());
    }

    let dependency_waves = plan_execution_order(&composition.sub_skills)?;
    let wave_limit = match composition.execution_mode {
        ExecutionMode::Sequential => 1,
        ExecutionMode::Parallel | ExecutionMode::Hybrid => composition
            .max_parallel
            .unwrap_or(MAX_PARALLEL_AGENTS)
            .clamp(1, MAX_PARALLEL_AGENTS) as usize,
    };

    let mut waves = Vec::new();
    for group in dependency_waves
        .iter()
        .flat_map(|wave| wave.chunks(wave_limit))
    {
        let specs = generate_parallel_task_specs(group, context)?;
        let spawn_prompt = generate_parallel_spawn_prompt(&specs)?;
        waves.push(PlannedWave {
            index: waves.len(),
            sub_skills: group.to_vec(),
            specs,
            spawn_prompt,
        });
    }

    let plan = ExecutionPlan {
        composition: composition.name.clone(),
        execution_mode: composition.execution_mode,
        waves,
        total_token_estimate: estimate_composition_tokens(composition),
    };
    debug!(
        composition = %plan.composition,
        waves = plan.waves.len(),
        tokens = plan.total_token_estimate,
        "execution plan built"
    );
    Ok(plan)
}

/// Record one open task per sub-skill. Tasks already present are left alone.
pub fn record_plan(store: &mut StateManager, plan: &ExecutionPlan) -> Result<()> {
    for skill in plan.waves.iter().flat_map(|wave| &wave.sub_skills) {
        let task_id = plan.task_id(skill);
        if store.task(&task_id).is_ok() {
            continue;
        }
        let mut task = TaskState::new(task_id, skill.role.clone());
        task.token_estimate = Some(skill.estimated_tokens());
        store.add_task(task)?;
    }
    Ok(())
}

/// Admit every worker of wave `wave_index`, or none of them.
///
/// On `Deny` nothing is written. On `Allow` each worker is added as a
/// `spawning` agent and assigned its sub-skill's task (recorded by
/// [`record_plan`]) in a single [`StateManager::transaction`], so a missing
/// task or a failed save admits nobody. `agent_spawned` / `task_assigned`
/// events are logged once the wave is saved.
pub fn register_wave(
    store: &mut StateManager,
    plan: &ExecutionPlan,
    wave_index: usize,
) -> Result<PermissionDecision> {
    let wave = plan
        .waves
        .get(wave_index)
        .ok_or(OrchestratorError::WaveNotFound {
            index: wave_index,
            waves: plan.waves.len(),
        })?;

    let decision = check_spawn_batch(store.state()?, wave.specs.len());
    if let PermissionDecision::Deny { reason } = &decision {
        warn!(composition = %plan.composition, wave = wave_index, %reason, "wave not admitted");
        return Ok(decision);
    }
    let assigned_at = store.timestamp();
    let admitted = store.transaction(|tx| {
        let mut admitted = Vec::with_capacity(wave.specs.len());
        for (skill, spec) in wave.sub_skills.iter().zip(&wave.specs) {
            let task_id = plan.task_id(skill);
            let spawned = tx.state().metrics.total_agents_spawned;
            let agent_id = format!("{}-{}", skill.skill_name, spawned + 1);

            let mut agent = AgentState::new(&agent_id, &spec.subagent_type, &skill.skill_name);
            agent.task_id = Some(task_id.clone());
            agent.assigned_at = Some(assigned_at.clone());
            tx.add_agent(agent);
            tx.update_task(
                &task_id,
                TaskPatch {
                    assignee: Some(agent_id.clone()),
                    ..TaskPatch::default()
                },
            )?;
            admitted.push((skill, spec, agent_id, task_id));
        }
        Ok(admitted)
    })?;

    for (skill, spec, agent_id, task_id) in admitted {
        let spawned_event = store
            .event(
                WorkflowEventType::AgentSpawned,
                json!({
                    "skill": skill.skill_name,
                    "composition": plan.composition,
                    "wave": wave_index,
                    "model": spec.model,
                }),
            )
            .for_agent(&agent_id);
        store.log_event(&spawned_event);
        let assigned_event = store
            .event(WorkflowEventType::TaskAssigned, json!({ "required": skill.required }))
            .for_agent(&agent_id)
            .for_task(&task_id);
        store.log_event(&assigned_event);
    }

    info!(
        composition = %plan.composition,
        wave = wave_index,
        agents = wave.specs.len(),
        "wave admitted"
    );
    Ok(decision)
}
