use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{ItemId, RepoRef};

/// `(item_id, run_after_ts, reason=quota, session_token?)` — spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRetryRecord {
    pub item_id: ItemId,
    pub run_after_ts: DateTime<Utc>,
    pub reason: String,
    pub session_token: Option<String>,
}

impl ScheduledRetryRecord {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_after_ts <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookQueueReason {
    Webhook,
    StalledRecovery,
}

/// A serialized work item reference awaiting dispatch, deduplicated by `item_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookQueueEntry {
    pub item_id: ItemId,
    pub repo: RepoRef,
    pub number: u64,
    pub reason: WebhookQueueReason,
    pub enqueued_at: DateTime<Utc>,
}

/// Ordered set of `owner/repo#number` keys authored by the orchestrator's
/// own identity; bounded to the most-recent `N` entries (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagedPrSet {
    entries: VecDeque<ManagedPrEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedPrEntry {
    pub repo: RepoRef,
    pub number: u64,
}

impl ManagedPrSet {
    pub const MAX_ENTRIES: usize = 20_000;

    /// Append `entry`, trimming the oldest entry if the bound would be
    /// exceeded (I3). No-op if `entry` is already present.
    pub fn push(&mut self, entry: ManagedPrEntry) {
        if self.entries.contains(&entry) {
            return;
        }
        self.entries.push_back(entry);
        while self.entries.len() > Self::MAX_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedPrEntry> {
        self.entries.iter()
    }

    /// The most-recent `n` entries, newest last (matches the scan order
    /// spec.md §4.6 expects from "the Managed-PR Set (most-recent N)").
    pub fn most_recent(&self, n: usize) -> Vec<ManagedPrEntry> {
        self.entries
            .iter()
            .rev()
            .take(n)
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> ManagedPrEntry {
        ManagedPrEntry {
            repo: RepoRef::new("o", "r"),
            number: n,
        }
    }

    #[test]
    fn push_deduplicates_and_trims_oldest() {
        let mut set = ManagedPrSet::default();
        for n in 0..5 {
            set.push(entry(n));
        }
        set.push(entry(2)); // duplicate, no-op
        assert_eq!(set.len(), 5);

        assert_eq!(set.most_recent(2), vec![entry(3), entry(4)]);
    }

    #[test]
    fn bounded_queue_never_exceeds_cap_i3() {
        let mut set = ManagedPrSet::default();
        for n in 0..(ManagedPrSet::MAX_ENTRIES as u64 + 10) {
            set.push(entry(n));
        }
        assert_eq!(set.len(), ManagedPrSet::MAX_ENTRIES);
    }
}
