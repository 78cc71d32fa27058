//! Optional orchestrator configuration file (`.claude/orchestrator.toml`).
//!
//! The file is meant to be edited by humans. Keys mirror the persisted JSON
//! config (camelCase); missing keys take their defaults.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::atomic::write_atomic;
use crate::core::config::OrchestrationConfig;

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestrationConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestrationConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = OrchestrationConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestrationConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestrationConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
