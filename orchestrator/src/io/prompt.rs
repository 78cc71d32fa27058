//! Prompt text for spawned workers and for the spawning turn itself.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::composition::SubSkillDefinition;
use crate::parallel::{ParallelTaskSpec, TaskContext};

const SUB_SKILL_TEMPLATE: &str = include_str!("prompts/sub_skill.md");
const PARALLEL_SPAWN_TEMPLATE: &str = include_str!("prompts/parallel_spawn.md");

/// Spawn-list row for the parallel spawn template.
#[derive(Debug, Serialize)]
struct SpawnRow<'a> {
    description: &'a str,
    subagent_type: &'a str,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("sub_skill", SUB_SKILL_TEMPLATE)
            .expect("sub_skill template should be valid");
        env.add_template("parallel_spawn", PARALLEL_SPAWN_TEMPLATE)
            .expect("parallel_spawn template should be valid");
        Self { env }
    }

    fn render_sub_skill(&self, skill: &SubSkillDefinition, task: &TaskContext) -> Result<String> {
        let shared_context = task
            .shared_context
            .as_ref()
            .map(serde_json::to_string_pretty)
            .transpose()
            .context("serialize shared context")?;
        let template = self.env.get_template("sub_skill")?;
        let rendered = template.render(context! {
            skill_name => &skill.skill_name,
            role => skill.role.trim(),
            required => skill.required,
            task_id => task.task_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            epic_id => task.epic_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            requirements => task.requirements.trim(),
            shared_context => shared_context,
        })?;
        Ok(rendered.trim().to_string())
    }

    fn render_parallel_spawn(&self, specs: &[ParallelTaskSpec]) -> Result<String> {
        let rows: Vec<SpawnRow<'_>> = specs
            .iter()
            .map(|spec| SpawnRow {
                description: &spec.description,
                subagent_type: &spec.subagent_type,
            })
            .collect();
        let template = self.env.get_template("parallel_spawn")?;
        let rendered = template.render(context! {
            count => specs.len(),
            tasks => rows,
        })?;
        Ok(rendered.trim().to_string())
    }
}

/// Worker prompt for one sub-skill: role, task context, skill reference, and
/// the report checklist.
pub fn render_sub_skill_prompt(skill: &SubSkillDefinition, task: &TaskContext) -> Result<String> {
    PromptEngine::new()
        .render_sub_skill(skill, task)
        .with_context(|| format!("render prompt for sub-skill {}", skill.skill_name))
}

/// Instruction to submit every spec of a wave in one message.
pub fn render_parallel_spawn_prompt(specs: &[ParallelTaskSpec]) -> Result<String> {
    PromptEngine::new()
        .render_parallel_spawn(specs)
        .context("render parallel spawn prompt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_context() -> TaskContext {
        TaskContext {
            epic_id: Some("bd-10".to_string()),
            task_id: Some("bd-11".to_string()),
            requirements: "Add login endpoint\n".to_string(),
            shared_context: Some(json!({"api": "/v1"})),
        }
    }

    #[test]
    fn sub_skill_prompt_embeds_context_and_checklist() {
        let skill = SubSkillDefinition::new("backend-dev", "Implement the API").required();
        let prompt = render_sub_skill_prompt(&skill, &task_context()).expect("render");

        assert!(prompt.starts_with("You are now acting as the backend-dev skill."));
        assert!(prompt.contains("## Your Role\nImplement the API\n"));
        assert!(prompt.contains("Task ID: bd-11\nEpic ID: bd-10\n"));
        assert!(prompt.contains("## Requirements\nAdd login endpoint\n"));
        assert!(prompt.contains("\"api\": \"/v1\""));
        assert!(prompt.contains(".claude/skills/backend-dev/SKILL.md"));
        assert!(prompt.contains("5. Token usage estimate"));
        assert!(prompt.ends_with("Failure is not acceptable."));
    }

    #[test]
    fn optional_sub_skill_without_ids_renders_placeholders() {
        let skill = SubSkillDefinition::new("docs", "Write docs");
        let context = TaskContext {
            requirements: "Document it".to_string(),
            ..TaskContext::default()
        };
        let prompt = render_sub_skill_prompt(&skill, &context).expect("render");

        assert!(prompt.contains("## Context\nNone\n"));
        assert!(prompt.contains("## Shared Context\nNone\n"));
        assert!(!prompt.contains("Task ID"));
        assert!(!prompt.contains("REQUIRED"));
        assert!(prompt.ends_with("5. Token usage estimate"));
    }

    #[test]
    fn spawn_prompt_lists_every_task() {
        let specs = vec![
            ParallelTaskSpec::worker("Execute a: api", "prompt a".to_string()),
            ParallelTaskSpec::worker("Execute b: ui", "prompt b".to_string()),
        ];
        let prompt = render_parallel_spawn_prompt(&specs).expect("render");

        assert!(prompt.starts_with(
            "CRITICAL: You must spawn 2 agents IN PARALLEL using a SINGLE message with 2 Task tool calls."
        ));
        assert!(prompt.contains(
            "Tasks to spawn:\n1. Execute a: api (general-purpose)\n2. Execute b: ui (general-purpose)\n\nREQUIREMENTS:"
        ));
        assert!(prompt.contains("4. Use the Task tool 2 times in the same response"));
        assert!(prompt.ends_with("all agents start simultaneously."));
    }
}
