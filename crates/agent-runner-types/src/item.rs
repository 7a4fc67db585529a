use std::fmt;

use serde::{Deserialize, Serialize};

/// A repository reference, e.g. `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Filesystem-safe key used for lock file names, e.g. `owner--name`.
    pub fn lock_key(&self) -> String {
        format!("{}--{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Opaque platform-side identity for an issue or PR (stable across renumbering).
pub type ItemId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Issue,
    PullRequest,
}

/// The mutually-exclusive at-rest labels a work item can carry (I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    Request,
    Queued,
    Running,
    Done,
    Failed,
    NeedsUserReply,
    ReviewFollowup,
    ReviewFollowupWaiting,
    ReviewFollowupActionRequired,
}

impl Label {
    /// The labels that are mutually exclusive at rest per the Work Item invariant.
    pub const TERMINAL_SET: [Label; 5] = [
        Label::Queued,
        Label::Running,
        Label::Done,
        Label::Failed,
        Label::NeedsUserReply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Request => "request",
            Label::Queued => "queued",
            Label::Running => "running",
            Label::Done => "done",
            Label::Failed => "failed",
            Label::NeedsUserReply => "needs-user-reply",
            Label::ReviewFollowup => "review-followup",
            Label::ReviewFollowupWaiting => "review-followup:waiting",
            Label::ReviewFollowupActionRequired => "review-followup:action-required",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author association with the repository, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Association {
    Owner,
    Member,
    Collaborator,
    Contributor,
    FirstTimeContributor,
    FirstTimer,
    None,
}

impl Association {
    /// Authors allowed to issue `/agent run` commands (spec.md §4.4 step 3).
    pub fn may_command(&self) -> bool {
        matches!(
            self,
            Association::Owner | Association::Member | Association::Collaborator
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author_login: String,
    pub author_association: Association,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A work item: an issue or PR the orchestrator may act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub repo: RepoRef,
    pub number: u64,
    pub id: ItemId,
    pub kind: ItemKind,
    pub labels: Vec<Label>,
    pub author_login: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub comments: Vec<Comment>,
}

impl WorkItem {
    pub fn has_label(&self, label: Label) -> bool {
        self.labels.contains(&label)
    }

    /// The subset of the mutually-exclusive terminal labels currently present.
    /// Used to check invariant I1 (at most one at rest).
    pub fn terminal_labels(&self) -> Vec<Label> {
        self.labels
            .iter()
            .copied()
            .filter(|l| Label::TERMINAL_SET.contains(l))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        !self.terminal_labels().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ref_lock_key_is_filesystem_safe() {
        let repo = RepoRef::new("acme-corp", "widgets");
        assert_eq!(repo.lock_key(), "acme-corp--widgets");
    }

    #[test]
    fn association_gating_matches_spec() {
        assert!(Association::Owner.may_command());
        assert!(Association::Member.may_command());
        assert!(Association::Collaborator.may_command());
        assert!(!Association::Contributor.may_command());
        assert!(!Association::None.may_command());
    }

    #[test]
    fn terminal_labels_excludes_request_and_review_followup() {
        let item = WorkItem {
            repo: RepoRef::new("o", "r"),
            number: 1,
            id: "i1".into(),
            kind: ItemKind::Issue,
            labels: vec![Label::Request, Label::Queued, Label::ReviewFollowup],
            author_login: "alice".into(),
            title: "t".into(),
            body: "b".into(),
            url: "u".into(),
            comments: vec![],
        };
        assert_eq!(item.terminal_labels(), vec![Label::Queued]);
        assert!(item.is_terminal());
    }
}
