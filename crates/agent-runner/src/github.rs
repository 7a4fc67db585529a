//! GitHub JSON ↔ domain-type translation (spec.md §4.2, §4.4).
//!
//! Label *names* on the wire are config-driven strings (`config.labels.queued`
//! etc.) except `"request"`, which has no config field. Every place that
//! turns a raw `issues`/`pulls` API payload into a [`WorkItem`], or turns a
//! [`Label`] back into the name to send the platform, goes through here
//! rather than [`Label::as_str`], which only knows the built-in kebab-case
//! literal and would silently diverge from a customized `labels.toml`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use agent_runner_types::{Association, Comment, ItemId, ItemKind, Label, RepoRef, WorkItem};

use crate::config::LabelsConfig;

/// Maps one GitHub label name to the domain [`Label`] it represents, `None`
/// if it isn't one of ours (repos commonly carry unrelated labels like
/// `bug` or `good first issue`, which should pass through untouched).
pub fn map_label_name(name: &str, labels: &LabelsConfig) -> Option<Label> {
    match name {
        "request" => Some(Label::Request),
        n if n == labels.queued => Some(Label::Queued),
        n if n == labels.running => Some(Label::Running),
        n if n == labels.done => Some(Label::Done),
        n if n == labels.failed => Some(Label::Failed),
        n if n == labels.needs_user_reply => Some(Label::NeedsUserReply),
        n if n == labels.review_followup => Some(Label::ReviewFollowup),
        n if n == format!("{}:waiting", labels.review_followup) => Some(Label::ReviewFollowupWaiting),
        n if n == format!("{}:{}", labels.review_followup, labels.action_required) => {
            Some(Label::ReviewFollowupActionRequired)
        }
        _ => None,
    }
}

/// The GitHub label name a [`Label`] should be added/removed as, honoring
/// the same config-driven names [`map_label_name`] reads.
pub fn label_name(labels: &LabelsConfig, label: Label) -> String {
    match label {
        Label::Request => "request".to_string(),
        Label::Queued => labels.queued.clone(),
        Label::Running => labels.running.clone(),
        Label::Done => labels.done.clone(),
        Label::Failed => labels.failed.clone(),
        Label::NeedsUserReply => labels.needs_user_reply.clone(),
        Label::ReviewFollowup => labels.review_followup.clone(),
        Label::ReviewFollowupWaiting => format!("{}:waiting", labels.review_followup),
        Label::ReviewFollowupActionRequired => {
            format!("{}:{}", labels.review_followup, labels.action_required)
        }
    }
}

/// Extracts the recognized [`Label`]s from a raw issue/PR payload's
/// `labels` array, without fetching comments — used for the lightweight
/// request-label promotion check that doesn't need a full [`WorkItem`].
pub(crate) fn labels_from_json(raw: &Value, labels_config: &LabelsConfig) -> Vec<Label> {
    raw.get("labels")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l.get("name").and_then(Value::as_str))
                .filter_map(|name| map_label_name(name, labels_config))
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_association(raw: &str) -> Association {
    match raw {
        "OWNER" => Association::Owner,
        "MEMBER" => Association::Member,
        "COLLABORATOR" => Association::Collaborator,
        "CONTRIBUTOR" => Association::Contributor,
        "FIRST_TIME_CONTRIBUTOR" => Association::FirstTimeContributor,
        "FIRST_TIMER" => Association::FirstTimer,
        _ => Association::None,
    }
}

pub fn parse_comment(raw: &Value) -> Option<Comment> {
    Some(Comment {
        id: raw.get("id")?.to_string(),
        author_login: raw.get("user")?.get("login")?.as_str()?.to_string(),
        author_association: raw
            .get("author_association")
            .and_then(Value::as_str)
            .map(parse_association)
            .unwrap_or(Association::None),
        body: raw.get("body").and_then(Value::as_str).unwrap_or_default().to_string(),
        created_at: raw
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

/// Builds a [`WorkItem`] from a raw `issues` (or `pulls`) API payload plus
/// its already-fetched comments. `id` is the platform's numeric `id` field
/// stringified, stable across renumbering unlike `number`.
pub fn parse_work_item(
    repo: RepoRef,
    raw: &Value,
    labels_config: &LabelsConfig,
    comments_raw: &[Value],
) -> Option<WorkItem> {
    let number = raw.get("number")?.as_u64()?;
    let id: ItemId = raw.get("id")?.to_string();
    let kind = if raw.get("pull_request").is_some() {
        ItemKind::PullRequest
    } else {
        ItemKind::Issue
    };
    let author_login = raw
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let title = raw.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    let body = raw.get("body").and_then(Value::as_str).unwrap_or_default().to_string();
    let url = raw
        .get("html_url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let labels = labels_from_json(raw, labels_config);
    let comments = comments_raw.iter().filter_map(parse_comment).collect();

    Some(WorkItem {
        repo,
        number,
        id,
        kind,
        labels,
        author_login,
        title,
        body,
        url,
        comments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels_config() -> LabelsConfig {
        LabelsConfig {
            queued: "queued".to_string(),
            running: "running".to_string(),
            done: "done".to_string(),
            failed: "failed".to_string(),
            needs_user_reply: "needs-user-reply".to_string(),
            review_followup: "review-followup".to_string(),
            action_required: "action-required".to_string(),
        }
    }

    #[test]
    fn map_label_name_recognizes_request_regardless_of_config() {
        assert_eq!(map_label_name("request", &labels_config()), Some(Label::Request));
    }

    #[test]
    fn map_label_name_honors_custom_names() {
        let mut labels = labels_config();
        labels.queued = "agent-queued".to_string();
        assert_eq!(map_label_name("agent-queued", &labels), Some(Label::Queued));
        assert_eq!(map_label_name("queued", &labels), None);
    }

    #[test]
    fn map_label_name_ignores_unrelated_labels() {
        assert_eq!(map_label_name("bug", &labels_config()), None);
    }

    #[test]
    fn label_name_round_trips_through_map_label_name() {
        let labels = labels_config();
        for label in [
            Label::Request,
            Label::Queued,
            Label::Running,
            Label::Done,
            Label::Failed,
            Label::NeedsUserReply,
            Label::ReviewFollowup,
            Label::ReviewFollowupWaiting,
            Label::ReviewFollowupActionRequired,
        ] {
            let name = label_name(&labels, label);
            assert_eq!(map_label_name(&name, &labels), Some(label));
        }
    }

    #[test]
    fn parse_work_item_reads_core_fields_and_labels() {
        let raw = json!({
            "number": 42,
            "id": 1001,
            "title": "Fix the thing",
            "body": "please target repo: widgets",
            "html_url": "https://github.com/acme/widgets/issues/42",
            "user": { "login": "alice" },
            "labels": [{ "name": "queued" }, { "name": "bug" }],
        });
        let item = parse_work_item(RepoRef::new("acme", "widgets"), &raw, &labels_config(), &[]).unwrap();
        assert_eq!(item.number, 42);
        assert_eq!(item.kind, ItemKind::Issue);
        assert_eq!(item.author_login, "alice");
        assert_eq!(item.labels, vec![Label::Queued]);
    }

    #[test]
    fn parse_work_item_detects_pull_request_kind() {
        let raw = json!({
            "number": 7,
            "id": 2002,
            "pull_request": { "url": "https://api.github.com/repos/acme/widgets/pulls/7" },
        });
        let item = parse_work_item(RepoRef::new("acme", "widgets"), &raw, &labels_config(), &[]).unwrap();
        assert_eq!(item.kind, ItemKind::PullRequest);
    }

    #[test]
    fn parse_comment_reads_association_and_body() {
        let raw = json!({
            "id": 555,
            "user": { "login": "bob" },
            "author_association": "COLLABORATOR",
            "body": "/agent run",
            "created_at": "2026-01-01T00:00:00Z",
        });
        let comment = parse_comment(&raw).unwrap();
        assert_eq!(comment.author_login, "bob");
        assert_eq!(comment.author_association, Association::Collaborator);
        assert_eq!(comment.body, "/agent run");
    }
}
