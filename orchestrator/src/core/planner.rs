//! Wavefront planning over sub-skill dependencies.

use std::collections::HashSet;

use crate::core::composition::SubSkillDefinition;
use crate::error::OrchestratorError;

/// Group sub-skills into waves that can each run fully in parallel.
///
/// Each wave holds every not-yet-placed sub-skill whose dependencies were all
/// placed in earlier waves, in input order. Fails with
/// [`OrchestratorError::Deadlock`] when nothing is ready (a cycle, or a
/// dependency on a name that is not in `sub_skills`).
pub fn plan_execution_order(
    sub_skills: &[SubSkillDefinition],
) -> Result<Vec<Vec<SubSkillDefinition>>, OrchestratorError> {
    let mut completed: HashSet<&str> = HashSet::new();
    let mut placed = vec![false; sub_skills.len()];
    let mut remaining = sub_skills.len();
    let mut waves = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = sub_skills
            .iter()
            .enumerate()
            .filter(|(idx, skill)| {
                !placed[*idx]
                    && skill
                        .dependencies
                        .iter()
                        .all(|dep| completed.contains(dep.as_str()))
            })
            .map(|(idx, _)| idx)
            .collect();

        if ready.is_empty() {
            let pending = sub_skills
                .iter()
                .zip(&placed)
                .filter(|(_, placed)| !**placed)
                .map(|(skill, _)| skill.skill_name.clone())
                .collect();
            return Err(OrchestratorError::Deadlock { pending });
        }

        for &idx in &ready {
            placed[idx] = true;
            completed.insert(sub_skills[idx].skill_name.as_str());
        }
        remaining -= ready.len();
        waves.push(ready.into_iter().map(|idx| sub_skills[idx].clone()).collect());
    }

    Ok(waves)
}
