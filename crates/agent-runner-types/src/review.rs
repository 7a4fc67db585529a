use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{ItemId, RepoRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    ReviewComment,
    Review,
    Approval,
}

impl ReviewReason {
    pub fn requires_engine(&self) -> bool {
        !matches!(self, ReviewReason::Approval)
    }
}

/// `(item_id, pr_number, repo, url, reason, requires_engine, enqueued_at)` —
/// deduplicated by `item_id` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub item_id: ItemId,
    pub pr_number: u64,
    pub repo: RepoRef,
    pub url: String,
    pub reason: ReviewReason,
    pub requires_engine: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// Logical review follow-up state, materialized to 0-2 labels (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewFollowupLabelState {
    None,
    Queued,
    Waiting,
    ActionRequired,
}

impl ReviewFollowupLabelState {
    pub fn labels(&self) -> &'static [crate::item::Label] {
        use crate::item::Label::*;
        match self {
            ReviewFollowupLabelState::None => &[],
            ReviewFollowupLabelState::Queued => &[ReviewFollowup],
            ReviewFollowupLabelState::Waiting => &[ReviewFollowup, ReviewFollowupWaiting],
            ReviewFollowupLabelState::ActionRequired => &[ReviewFollowupActionRequired],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_materialization_matches_spec_table() {
        assert_eq!(ReviewFollowupLabelState::None.labels(), &[]);
        assert_eq!(
            ReviewFollowupLabelState::Queued.labels(),
            &[crate::item::Label::ReviewFollowup]
        );
        assert_eq!(
            ReviewFollowupLabelState::Waiting.labels(),
            &[
                crate::item::Label::ReviewFollowup,
                crate::item::Label::ReviewFollowupWaiting
            ]
        );
        assert_eq!(
            ReviewFollowupLabelState::ActionRequired.labels(),
            &[crate::item::Label::ReviewFollowupActionRequired]
        );
    }

    #[test]
    fn approval_reason_does_not_require_engine() {
        assert!(!ReviewReason::Approval.requires_engine());
        assert!(ReviewReason::Review.requires_engine());
        assert!(ReviewReason::ReviewComment.requires_engine());
    }
}
