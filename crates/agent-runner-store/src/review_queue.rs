//! `state/review-queue.json` + sibling `.lock` — PR review follow-up
//! candidates, deduplicated by `item_id` (spec.md §3 "Review Queue Entry").

use std::path::{Path, PathBuf};

use agent_runner_types::ReviewQueueEntry;
use anyhow::Result;

use crate::json_file;

/// FIFO cap; the webhook/reconciler producers are expected to stay well
/// under this in practice, it exists only as a defensive ceiling.
pub const MAX_ENTRIES: usize = 5_000;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("review-queue.json")
}

pub fn load(state_dir: &Path) -> Result<Vec<ReviewQueueEntry>> {
    json_file::read_json_or_default(&path(state_dir))
}

/// Insert or replace the entry for `entry.item_id`, trimming the oldest
/// entry past `MAX_ENTRIES` (same bounded shape as the Managed-PR Set).
pub fn upsert(state_dir: &Path, entry: ReviewQueueEntry) -> Result<()> {
    json_file::with_locked::<Vec<ReviewQueueEntry>, ()>(&path(state_dir), |entries| {
        if let Some(existing) = entries.iter_mut().find(|e| e.item_id == entry.item_id) {
            *existing = entry;
        } else {
            entries.push(entry);
            while entries.len() > MAX_ENTRIES {
                entries.remove(0);
            }
        }
        Ok(())
    })
}

/// Remove and return the first entry matching `predicate`, under lock
/// (FIFO, predicate-based take per spec.md §3).
pub fn take_first(
    state_dir: &Path,
    predicate: impl Fn(&ReviewQueueEntry) -> bool,
) -> Result<Option<ReviewQueueEntry>> {
    json_file::with_locked::<Vec<ReviewQueueEntry>, Option<ReviewQueueEntry>>(
        &path(state_dir),
        |entries| {
            let idx = entries.iter().position(&predicate);
            Ok(idx.map(|i| entries.remove(i)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::{ReviewReason, RepoRef};
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(item_id: &str) -> ReviewQueueEntry {
        ReviewQueueEntry {
            item_id: item_id.into(),
            pr_number: 1,
            repo: RepoRef::new("o", "r"),
            url: "https://example.invalid/pr/1".into(),
            reason: ReviewReason::ReviewComment,
            requires_engine: true,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_dedups_by_item_id() {
        let dir = tempdir().unwrap();
        upsert(dir.path(), entry("i1")).unwrap();
        upsert(dir.path(), entry("i1")).unwrap();
        assert_eq!(load(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn take_first_removes_matching_entry() {
        let dir = tempdir().unwrap();
        upsert(dir.path(), entry("i1")).unwrap();
        let taken = take_first(dir.path(), |e| e.item_id == "i1").unwrap();
        assert!(taken.is_some());
        assert!(load(dir.path()).unwrap().is_empty());
    }
}
