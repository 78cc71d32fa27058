//! Canonical locations under `.claude/` for a project root.

use std::path::PathBuf;

/// All paths the orchestrator reads or writes for one project root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub claude_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub agents_path: PathBuf,
    pub tasks_path: PathBuf,
    pub events_path: PathBuf,
    pub rate_limit_path: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let claude_dir = root.join(".claude");
        let state_dir = claude_dir.join("state");
        Self {
            root: root.clone(),
            claude_dir: claude_dir.clone(),
            state_dir: state_dir.clone(),
            config_path: claude_dir.join("orchestrator.toml"),
            state_path: state_dir.join("orchestration.json"),
            agents_path: state_dir.join("agents.json"),
            tasks_path: state_dir.join("tasks.json"),
            events_path: state_dir.join("events.jsonl"),
            rate_limit_path: state_dir.join("rate_limit.json"),
        }
    }
}
