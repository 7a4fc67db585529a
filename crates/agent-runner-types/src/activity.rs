use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{ItemId, RepoRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Issue,
    Idle,
}

/// A live subprocess supervised by this orchestrator (spec.md §3 "Activity Record").
///
/// `id` is `issue:<item_id>` for issue-kind activity and `idle:<uuid>` for
/// idle-kind activity, matching the spec's identity grammar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub kind: ActivityKind,
    pub engine: String,
    pub repo: RepoRef,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub log_path: String,
    /// Present when `kind == Issue`.
    pub item_id: Option<ItemId>,
    pub item_number: Option<u64>,
    /// Present when `kind == Idle`.
    pub idle_task: Option<String>,
}

impl ActivityRecord {
    pub fn issue_id(item_id: &str) -> String {
        format!("issue:{item_id}")
    }

    pub fn idle_id(uuid: &str) -> String {
        format!("idle:{uuid}")
    }
}

/// Legacy per-issue projection of [`ActivityRecord`], kept in sync so
/// recovery code can find orphans even if the Activity table itself is
/// missing an entry (spec.md §3 "Running-Issue Record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningIssueRecord {
    pub item_id: ItemId,
    pub item_number: u64,
    pub repo: RepoRef,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}
