//! Test-only fixtures: a controllable clock, a temp-dir state store, and
//! sample compositions.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::composition::{ExecutionMode, SkillComposition, SubSkillDefinition};
use crate::core::config::OrchestrationConfig;
use crate::core::rate_limit::Clock;
use crate::io::rate_wait::Sleeper;
use crate::io::state_store::StateManager;

/// Clock that only moves when told to. Clones share the same time.
///
/// Also a [`Sleeper`]: sleeping advances the clock instead of blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    /// Starts at 2025-01-01T00:00:00Z.
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(chrono::Duration::seconds(secs as i64));
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(chrono::Duration::milliseconds(millis as i64));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.advance(chrono::Duration::from_std(duration).unwrap());
    }
}

/// Initialized [`StateManager`] rooted in a temp dir, on a [`ManualClock`].
pub struct TestState {
    pub dir: TempDir,
    pub clock: ManualClock,
    pub store: StateManager,
}

impl TestState {
    pub fn new() -> Self {
        Self::with_config(OrchestrationConfig::default())
    }

    pub fn with_max_agents(max_parallel_agents: u32) -> Self {
        Self::with_config(OrchestrationConfig {
            max_parallel_agents,
            ..OrchestrationConfig::default()
        })
    }

    pub fn with_config(config: OrchestrationConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = ManualClock::default();
        let mut store = StateManager::new(dir.path())
            .with_config(config)
            .expect("valid config")
            .with_clock(clock.clone());
        store.initialize().expect("initialize state");
        Self { dir, clock, store }
    }
}

impl Default for TestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Diamond-shaped hybrid composition:
/// `schema` -> (`backend`, `frontend`) -> `e2e-tests`.
pub fn fullstack_composition() -> SkillComposition {
    let mut schema = SubSkillDefinition::new("schema", "Design the database schema").required();
    schema.token_estimate = Some(30_000);
    let mut backend = SubSkillDefinition::new("backend", "Implement the API endpoints")
        .depends_on(["schema"])
        .required();
    backend.token_estimate = Some(80_000);
    let mut frontend =
        SubSkillDefinition::new("frontend", "Build the UI components").depends_on(["schema"]);
    frontend.token_estimate = Some(60_000);
    let e2e = SubSkillDefinition::new("e2e-tests", "Write end-to-end tests")
        .depends_on(["backend", "frontend"]);

    SkillComposition {
        name: "fullstack-feature".to_string(),
        description: "Full-stack feature delivery".to_string(),
        sub_skills: vec![schema, backend, frontend, e2e],
        execution_mode: ExecutionMode::Hybrid,
        max_parallel: None,
    }
}

/// `count` independent sub-skills named `worker-0`, `worker-1`, ...
pub fn independent_composition(count: usize, mode: ExecutionMode) -> SkillComposition {
    SkillComposition {
        name: format!("batch-{count}"),
        description: String::new(),
        sub_skills: (0..count)
            .map(|idx| SubSkillDefinition::new(format!("worker-{idx}"), "independent work"))
            .collect(),
        execution_mode: mode,
        max_parallel: None,
    }
}
