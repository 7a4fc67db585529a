//! `state/running.json` — legacy per-issue projection of [`activity`],
//! kept in sync so recovery code can find orphaned subprocesses even if
//! the Activity table entry is missing (spec.md §3 "Running-Issue Record").

use std::path::{Path, PathBuf};

use agent_runner_types::RunningIssueRecord;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("running.json")
}

pub fn load(state_dir: &Path) -> Result<Vec<RunningIssueRecord>> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, records: &[RunningIssueRecord]) -> Result<()> {
    json_file::write_json(&path(state_dir), &records)
}

pub fn remove(records: &mut Vec<RunningIssueRecord>, item_id: &str) -> Option<RunningIssueRecord> {
    let idx = records.iter().position(|r| r.item_id == item_id)?;
    Some(records.remove(idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::RepoRef;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn round_trips_and_removes_by_item_id() {
        let dir = tempdir().unwrap();
        let mut records = load(dir.path()).unwrap();
        records.push(RunningIssueRecord {
            item_id: "i1".into(),
            item_number: 1,
            repo: RepoRef::new("o", "r"),
            pid: 42,
            started_at: Utc::now(),
        });
        save(dir.path(), &records).unwrap();

        let mut reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        let removed = remove(&mut reloaded, "i1");
        assert!(removed.is_some());
        assert!(reloaded.is_empty());
    }
}
