//! Temp-file-plus-rename writes.
//!
//! A reader never observes a half-written document: the new contents land in a
//! sibling temp file that then replaces the target in one rename. This does not
//! coordinate concurrent writers; the state directory assumes a single writer
//! process.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Replace `path` with `contents`, creating parent directories as needed.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// `orchestration.json` -> `orchestration.json.tmp`.
fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
