//! `state/webhook-queue.json` + sibling `.lock` — items awaiting dispatch
//! because a webhook (or stalled-recovery scan) enqueued them. The axum
//! handler in the core crate's `webhook` module only ever appends here
//! under lock; the Dispatcher is the sole consumer (Design Note §9(e): no
//! direct platform-state mutation from the HTTP handler).

use std::path::{Path, PathBuf};

use agent_runner_types::WebhookQueueEntry;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("webhook-queue.json")
}

pub fn load(state_dir: &Path) -> Result<Vec<WebhookQueueEntry>> {
    json_file::read_json_or_default(&path(state_dir))
}

/// Append `entry`, deduplicated by `item_id` (last write wins, so a
/// `StalledRecovery` re-enqueue refreshes `enqueued_at`).
pub fn push(state_dir: &Path, entry: WebhookQueueEntry) -> Result<()> {
    json_file::with_locked::<Vec<WebhookQueueEntry>, ()>(&path(state_dir), |entries| {
        entries.retain(|e| e.item_id != entry.item_id);
        entries.push(entry);
        Ok(())
    })
}

/// Drain the whole queue for the Dispatcher's tick, returning what was
/// queued and leaving the file empty.
pub fn drain(state_dir: &Path) -> Result<Vec<WebhookQueueEntry>> {
    json_file::with_locked::<Vec<WebhookQueueEntry>, Vec<WebhookQueueEntry>>(
        &path(state_dir),
        |entries| Ok(std::mem::take(entries)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::{RepoRef, WebhookQueueReason};
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(item_id: &str) -> WebhookQueueEntry {
        WebhookQueueEntry {
            item_id: item_id.into(),
            repo: RepoRef::new("o", "r"),
            number: 1,
            reason: WebhookQueueReason::Webhook,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn push_dedups_by_item_id() {
        let dir = tempdir().unwrap();
        push(dir.path(), entry("i1")).unwrap();
        push(dir.path(), entry("i1")).unwrap();
        assert_eq!(load(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn drain_empties_the_queue() {
        let dir = tempdir().unwrap();
        push(dir.path(), entry("i1")).unwrap();
        let drained = drain(dir.path()).unwrap();
        assert_eq!(drained.len(), 1);
        assert!(load(dir.path()).unwrap().is_empty());
    }
}
