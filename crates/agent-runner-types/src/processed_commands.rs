use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Bounded most-recently-seen set of comment ids already acted on by
/// `commands::parse_agent_command`, so a re-delivered webhook or a second
/// reconciler pass never re-runs the same `/agent ...` comment twice.
/// Same bounded-trim-on-insert shape as [`crate::ManagedPrSet`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedCommandSet {
    seen: VecDeque<String>,
}

impl ProcessedCommandSet {
    pub const MAX_ENTRIES: usize = 20_000;

    /// Records `comment_id` as processed. Returns `true` if it was not
    /// already present (i.e. the caller should act on the command).
    pub fn mark_processed(&mut self, comment_id: impl Into<String>) -> bool {
        let comment_id = comment_id.into();
        if self.seen.contains(&comment_id) {
            return false;
        }
        self.seen.push_back(comment_id);
        while self.seen.len() > Self::MAX_ENTRIES {
            self.seen.pop_front();
        }
        true
    }

    pub fn contains(&self, comment_id: &str) -> bool {
        self.seen.contains(&comment_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_acts_repeat_mark_does_not() {
        let mut set = ProcessedCommandSet::default();
        assert!(set.mark_processed("c1"));
        assert!(!set.mark_processed("c1"));
        assert!(set.contains("c1"));
    }

    #[test]
    fn bounded_to_max_entries() {
        let mut set = ProcessedCommandSet::default();
        for n in 0..(ProcessedCommandSet::MAX_ENTRIES + 5) {
            set.mark_processed(format!("c{n}"));
        }
        assert_eq!(set.len(), ProcessedCommandSet::MAX_ENTRIES);
        assert!(!set.contains("c0"));
    }
}
