//! `state/activity.json` — the supervision table of live subprocesses
//! (spec.md §3 "Activity Record"), keyed by `id` (`issue:<item_id>` or
//! `idle:<uuid>`). Invariant I2 ("at most one Activity per repo") is
//! enforced here, not by the caller.

use std::path::{Path, PathBuf};

use agent_runner_types::{ActivityRecord, RepoRef};
use anyhow::{bail, Result};

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("activity.json")
}

pub fn load(state_dir: &Path) -> Result<Vec<ActivityRecord>> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, records: &[ActivityRecord]) -> Result<()> {
    json_file::write_json(&path(state_dir), &records)
}

/// Insert `record`, rejecting it if another live Activity already occupies
/// `record.repo` (I2). Callers must hold the per-repo lock for the
/// duration of spawn + insert so this check is race-free.
pub fn insert(records: &mut Vec<ActivityRecord>, record: ActivityRecord) -> Result<()> {
    if records.iter().any(|r| r.repo == record.repo) {
        bail!(
            "an Activity is already running for repo {} (I2: at most one Activity per repo)",
            record.repo
        );
    }
    records.push(record);
    Ok(())
}

pub fn remove(records: &mut Vec<ActivityRecord>, id: &str) -> Option<ActivityRecord> {
    let idx = records.iter().position(|r| r.id == id)?;
    Some(records.remove(idx))
}

pub fn for_repo<'a>(records: &'a [ActivityRecord], repo: &RepoRef) -> Option<&'a ActivityRecord> {
    records.iter().find(|r| &r.repo == repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::ActivityKind;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(repo: RepoRef) -> ActivityRecord {
        ActivityRecord {
            id: ActivityRecord::issue_id("i1"),
            kind: ActivityKind::Issue,
            engine: "primary".into(),
            repo,
            started_at: Utc::now(),
            pid: 1234,
            log_path: "logs/repo-issue-1.log".into(),
            item_id: Some("i1".into()),
            item_number: Some(1),
            idle_task: None,
        }
    }

    #[test]
    fn second_activity_for_same_repo_is_rejected_i2() {
        let mut records = vec![];
        insert(&mut records, record(RepoRef::new("o", "r"))).unwrap();
        let err = insert(&mut records, record(RepoRef::new("o", "r"))).unwrap_err();
        assert!(err.to_string().contains("I2"));
    }

    #[test]
    fn round_trips_through_the_store_file() {
        let dir = tempdir().unwrap();
        let mut records = load(dir.path()).unwrap();
        assert!(records.is_empty());
        insert(&mut records, record(RepoRef::new("o", "r"))).unwrap();
        save(dir.path(), &records).unwrap();

        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}
