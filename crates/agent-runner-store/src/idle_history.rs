//! `state/idle-history.json` — per-repo last idle run + rotating task
//! cursor (spec.md §3 "Idle History").

use std::path::{Path, PathBuf};

use agent_runner_types::IdleHistory;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("idle-history.json")
}

pub fn load(state_dir: &Path) -> Result<IdleHistory> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, history: &IdleHistory) -> Result<()> {
    json_file::write_json(&path(state_dir), history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_task_cursor() {
        let dir = tempdir().unwrap();
        let mut history = load(dir.path()).unwrap();
        let tasks = vec!["a".to_string(), "b".to_string()];
        history.next_task(&tasks);
        save(dir.path(), &history).unwrap();

        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.task_cursor, 1);
    }
}
