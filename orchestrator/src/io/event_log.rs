//! Append-only workflow event log (`events.jsonl`).
//!
//! One JSON object per line. Writers only ever append; readers tolerate a
//! partially written final line left by an interrupted append.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::WorkflowEvent;

/// Append one event as a single line.
pub fn append_event(path: &Path, event: &WorkflowEvent) -> Result<()> {
    let mut line = serde_json::to_string(event).context("serialize workflow event")?;
    line.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append event log {}", path.display()))?;
    Ok(())
}

/// Read every complete event, oldest first.
///
/// A missing log reads as empty. A malformed *final* line is skipped; a
/// malformed line anywhere else is corruption and fails the read.
pub fn read_events(path: &Path) -> Result<Vec<WorkflowEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read(path).with_context(|| format!("read event log {}", path.display()))?;
    let lines: Vec<(usize, &[u8])> = contents
        .split(|byte| *byte == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.trim_ascii().is_empty())
        .collect();

    let mut events = Vec::with_capacity(lines.len());
    for (pos, (line_no, line)) in lines.iter().enumerate() {
        match serde_json::from_slice::<WorkflowEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) if pos + 1 == lines.len() => {
                warn!(path = %path.display(), line = line_no + 1, error = %err, "skipping partial final event");
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("parse event log {} line {}", path.display(), line_no + 1)
                });
            }
        }
    }
    Ok(events)
}
