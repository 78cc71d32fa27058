//! Declarative sub-skill compositions and their validation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::config::MAX_PARALLEL_AGENTS;

/// Token estimate assumed for sub-skills that do not declare one.
pub const DEFAULT_SUB_SKILL_TOKENS: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    Hybrid,
}

/// A named DAG of sub-skills. Input to planning; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillComposition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sub_skills: Vec<SubSkillDefinition>,
    pub execution_mode: ExecutionMode,
    /// Max concurrent sub-skills (system ceiling applies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubSkillDefinition {
    pub skill_name: String,
    pub role: String,
    /// Names of sub-skills that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this sub-skill must complete successfully.
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_estimate: Option<u64>,
}

impl SubSkillDefinition {
    pub fn new(skill_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            skill_name: skill_name.into(),
            role: role.into(),
            dependencies: Vec::new(),
            required: false,
            token_estimate: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.token_estimate.unwrap_or(DEFAULT_SUB_SKILL_TOKENS)
    }
}

/// Validation verdict; `valid` iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check the composition for cycles, duplicate names, and parallelism limits.
///
/// Errors are collected, never raised: one entry per sub-skill whose reachable
/// dependency set contains a cycle, then one per violated limit.
pub fn validate_skill_composition(composition: &SkillComposition) -> CompositionValidation {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for skill in &composition.sub_skills {
        if !seen.insert(skill.skill_name.as_str()) {
            errors.push(format!("Duplicate sub-skill name {}", skill.skill_name));
        }
    }

    let graph: HashMap<&str, &[String]> = composition
        .sub_skills
        .iter()
        .map(|skill| (skill.skill_name.as_str(), skill.dependencies.as_slice()))
        .collect();
    for skill in &composition.sub_skills {
        if reaches_cycle(&graph, &skill.skill_name) {
            errors.push(format!(
                "Circular dependency detected involving {}",
                skill.skill_name
            ));
        }
    }

    if let Some(max_parallel) = composition.max_parallel
        && max_parallel > MAX_PARALLEL_AGENTS
    {
        errors.push(format!(
            "maxParallel cannot exceed {MAX_PARALLEL_AGENTS} (system limit)"
        ));
    }

    let count = composition.sub_skills.len();
    if composition.execution_mode == ExecutionMode::Parallel && count > MAX_PARALLEL_AGENTS as usize
    {
        errors.push(format!(
            "Parallel execution with {count} sub-skills exceeds limit of {MAX_PARALLEL_AGENTS}"
        ));
    }

    CompositionValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// Depth-first search from `start` with an explicit stack.
///
/// `on_path` holds the nodes of the current path; `visited` the nodes already
/// entered. Reaching a node that is on the path means a cycle is reachable.
fn reaches_cycle(graph: &HashMap<&str, &[String]>, start: &str) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
    visited.insert(start);
    on_path.insert(start);

    while let Some(&(node, next_dep)) = stack.last() {
        let deps = graph.get(node).copied().unwrap_or_default();
        match deps.get(next_dep) {
            Some(dep) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let dep = dep.as_str();
                if on_path.contains(dep) {
                    return true;
                }
                if visited.insert(dep) {
                    on_path.insert(dep);
                    stack.push((dep, 0));
                }
            }
            None => {
                on_path.remove(node);
                stack.pop();
            }
        }
    }
    false
}

/// Sum of per-sub-skill estimates, defaulting missing ones.
pub fn estimate_composition_tokens(composition: &SkillComposition) -> u64 {
    composition
        .sub_skills
        .iter()
        .map(SubSkillDefinition::estimated_tokens)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composition(mode: ExecutionMode, sub_skills: Vec<SubSkillDefinition>) -> SkillComposition {
        SkillComposition {
            name: "feature".to_string(),
            description: "build a feature".to_string(),
            sub_skills,
            execution_mode: mode,
            max_parallel: None,
        }
    }

    fn independent(count: usize) -> Vec<SubSkillDefinition> {
        (0..count)
            .map(|idx| SubSkillDefinition::new(format!("skill-{idx}"), "worker"))
            .collect()
    }

    #[test]
    fn acyclic_composition_is_valid() {
        let c = composition(
            ExecutionMode::Hybrid,
            vec![
                SubSkillDefinition::new("a", "schema"),
                SubSkillDefinition::new("b", "api").depends_on(["a"]),
                SubSkillDefinition::new("c", "ui").depends_on(["a"]),
                SubSkillDefinition::new("d", "e2e").depends_on(["b", "c"]),
            ],
        );
        let result = validate_skill_composition(&c);
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn reports_each_skill_that_reaches_a_cycle() {
        let c = composition(
            ExecutionMode::Sequential,
            vec![
                SubSkillDefinition::new("a", "x").depends_on(["b"]),
                SubSkillDefinition::new("b", "y").depends_on(["a"]),
                SubSkillDefinition::new("c", "z"),
            ],
        );
        let result = validate_skill_composition(&c);
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![
                "Circular dependency detected involving a",
                "Circular dependency detected involving b",
            ]
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let c = composition(
            ExecutionMode::Sequential,
            vec![SubSkillDefinition::new("solo", "x").depends_on(["solo"])],
        );
        assert_eq!(
            validate_skill_composition(&c).errors,
            vec!["Circular dependency detected involving solo"]
        );
    }

    #[test]
    fn diamond_revisit_is_not_a_cycle() {
        let c = composition(
            ExecutionMode::Sequential,
            vec![
                SubSkillDefinition::new("top", "x").depends_on(["left", "right"]),
                SubSkillDefinition::new("left", "x").depends_on(["base"]),
                SubSkillDefinition::new("right", "x").depends_on(["base"]),
                SubSkillDefinition::new("base", "x"),
            ],
        );
        assert!(validate_skill_composition(&c).valid);
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let mut skills = vec![SubSkillDefinition::new("n0", "x")];
        for idx in 1..20_000 {
            skills.push(
                SubSkillDefinition::new(format!("n{idx}"), "x")
                    .depends_on([format!("n{}", idx - 1)]),
            );
        }
        let c = composition(ExecutionMode::Sequential, skills);
        let graph: HashMap<&str, &[String]> = c
            .sub_skills
            .iter()
            .map(|s| (s.skill_name.as_str(), s.dependencies.as_slice()))
            .collect();
        assert!(!reaches_cycle(&graph, "n19999"));
    }

    #[test]
    fn parallel_mode_over_limit_is_rejected() {
        let parallel = composition(ExecutionMode::Parallel, independent(8));
        let result = validate_skill_composition(&parallel);
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec!["Parallel execution with 8 sub-skills exceeds limit of 7"]
        );

        let sequential = composition(ExecutionMode::Sequential, independent(8));
        assert!(validate_skill_composition(&sequential).valid);
    }

    #[test]
    fn max_parallel_above_ceiling_is_rejected() {
        let mut c = composition(ExecutionMode::Hybrid, independent(2));
        c.max_parallel = Some(8);
        assert_eq!(
            validate_skill_composition(&c).errors,
            vec!["maxParallel cannot exceed 7 (system limit)"]
        );
        c.max_parallel = Some(7);
        assert!(validate_skill_composition(&c).valid);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let c = composition(
            ExecutionMode::Sequential,
            vec![SubSkillDefinition::new("a", "x"), SubSkillDefinition::new("a", "y")],
        );
        assert_eq!(
            validate_skill_composition(&c).errors,
            vec!["Duplicate sub-skill name a"]
        );
    }

    #[test]
    fn token_estimate_defaults_missing_values() {
        let mut skills = independent(3);
        skills[0].token_estimate = Some(10_000);
        let c = composition(ExecutionMode::Parallel, skills);
        assert_eq!(estimate_composition_tokens(&c), 10_000 + 2 * DEFAULT_SUB_SKILL_TOKENS);
    }

    #[test]
    fn deserializes_camel_case_composition() {
        let c: SkillComposition = serde_json::from_str(
            r#"{
                "name": "fullstack",
                "subSkills": [
                    {"skillName": "backend", "role": "API", "required": true, "tokenEstimate": 80000},
                    {"skillName": "frontend", "role": "UI", "dependencies": ["backend"], "required": false}
                ],
                "executionMode": "hybrid",
                "maxParallel": 2
            }"#,
        )
        .expect("parse");
        assert_eq!(c.sub_skills.len(), 2);
        assert!(c.sub_skills[0].required);
        assert_eq!(c.sub_skills[1].dependencies, vec!["backend"]);
        assert_eq!(c.execution_mode, ExecutionMode::Hybrid);
    }
}
