//! Status snapshot aggregation, consumed by the `status [--json]` CLI
//! subcommand and persisted as `idle-report.json`.

use serde::Serialize;

use agent_runner_store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running_count: usize,
    pub queued_managed_pr_count: usize,
    pub review_queue_depth: usize,
    pub webhook_queue_depth: usize,
    pub gemini_blocked_models: Vec<String>,
}

pub fn snapshot(store: &Store, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<StatusSnapshot> {
    let running = store.load_activity()?;
    let managed_prs = store.load_managed_prs()?;
    let webhook_queue = store.drain_webhook_queue()?;
    // `drain` empties the queue as a side effect; re-persist it immediately
    // so a status read is never destructive.
    for entry in &webhook_queue {
        store.push_webhook_queue_entry(entry.clone())?;
    }
    let review_queue_depth = agent_runner_store::review_queue::load(store.state_dir())?.len();
    let backoff = store.load_gemini_backoff()?;
    let blocked = backoff
        .blocked_until
        .iter()
        .filter(|(_, until)| **until > now)
        .map(|(model, _)| model.clone())
        .collect();

    Ok(StatusSnapshot {
        running_count: running.len(),
        queued_managed_pr_count: managed_prs.len(),
        review_queue_depth,
        webhook_queue_depth: webhook_queue.len(),
        gemini_blocked_models: blocked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_on_empty_store_is_all_zero() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let snap = snapshot(&store, chrono::Utc::now()).unwrap();
        assert_eq!(snap.running_count, 0);
        assert_eq!(snap.webhook_queue_depth, 0);
        assert!(snap.gemini_blocked_models.is_empty());
    }
}
