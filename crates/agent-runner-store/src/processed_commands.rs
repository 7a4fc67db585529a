//! `state/agent-command-state.json` — bounded most-recent set of comment
//! ids already acted on by `commands::parse_agent_command`, so a
//! re-delivered webhook never re-runs the same `/agent ...` comment twice
//! (Design Note §9(d)).

use std::path::{Path, PathBuf};

use agent_runner_types::ProcessedCommandSet;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("agent-command-state.json")
}

pub fn load(state_dir: &Path) -> Result<ProcessedCommandSet> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, set: &ProcessedCommandSet) -> Result<()> {
    json_file::write_json(&path(state_dir), set)
}

/// Mark `comment_id` processed, persisting the result. Returns `true` if
/// this is the first time the comment has been seen.
pub fn mark_processed(state_dir: &Path, comment_id: &str) -> Result<bool> {
    let mut set = load(state_dir)?;
    let acted = set.mark_processed(comment_id);
    save(state_dir, &set)?;
    Ok(acted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mark_processed_persists_across_reloads() {
        let dir = tempdir().unwrap();
        assert!(mark_processed(dir.path(), "c1").unwrap());
        assert!(!mark_processed(dir.path(), "c1").unwrap());
    }
}
