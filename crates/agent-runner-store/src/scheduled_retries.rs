//! `state/scheduled-retries.json` — quota-driven deferred re-dispatch
//! records (spec.md §3 "Scheduled Retry Record").

use std::path::{Path, PathBuf};

use agent_runner_types::ScheduledRetryRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("scheduled-retries.json")
}

pub fn load(state_dir: &Path) -> Result<Vec<ScheduledRetryRecord>> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, records: &[ScheduledRetryRecord]) -> Result<()> {
    json_file::write_json(&path(state_dir), &records)
}

/// Split `records` into `(due, not_due)` at `now`, so the dispatcher can
/// drain the due half and persist the rest back unchanged.
pub fn partition_due(
    records: Vec<ScheduledRetryRecord>,
    now: DateTime<Utc>,
) -> (Vec<ScheduledRetryRecord>, Vec<ScheduledRetryRecord>) {
    records.into_iter().partition(|r| r.is_due(now))
}

pub fn upsert(records: &mut Vec<ScheduledRetryRecord>, record: ScheduledRetryRecord) {
    if let Some(existing) = records.iter_mut().find(|r| r.item_id == record.item_id) {
        *existing = record;
    } else {
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(item_id: &str, run_after_ts: DateTime<Utc>) -> ScheduledRetryRecord {
        ScheduledRetryRecord {
            item_id: item_id.into(),
            run_after_ts,
            reason: "quota".into(),
            session_token: None,
        }
    }

    #[test]
    fn partition_splits_due_from_not_due() {
        let now = Utc::now();
        let records = vec![
            record("due", now - Duration::minutes(1)),
            record("not-due", now + Duration::minutes(5)),
        ];
        let (due, not_due) = partition_due(records, now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].item_id, "due");
        assert_eq!(not_due.len(), 1);
        assert_eq!(not_due[0].item_id, "not-due");
    }

    #[test]
    fn upsert_replaces_existing_by_item_id() {
        let mut records = vec![record("i1", Utc::now())];
        let replacement = record("i1", Utc::now() + Duration::hours(1));
        upsert(&mut records, replacement.clone());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_after_ts, replacement.run_after_ts);
    }
}
