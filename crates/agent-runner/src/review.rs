//! Review Follow-up Engine (spec.md §4.6): per-candidate classification,
//! label materialization, and the auto-merge state machine.

use std::collections::HashMap;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::Value;

use agent_runner_types::{Label, ReviewFollowupLabelState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewerVerdict {
    Approved,
    ChangesRequested,
    OkComment,
    ActionableComment,
    Pending,
}

/// Phrases that mark a `COMMENTED` review as a non-blocking acknowledgment
/// rather than actionable feedback (spec.md §4.6, English subset; the
/// localized phrases the spec alludes to are left for a follow-up since
/// spec.md does not enumerate them).
static OK_PHRASES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)no new comments",
        r"(?i)no issues found",
        r"(?i)looks good",
        r"(?i)lgtm",
        r"(?i)approved",
        r"(?i)usage limit",
        r"(?i)rate limit",
        r"(?i)quota",
        r"(?i)unable to review",
    ])
    .unwrap()
});

fn is_ok_comment(body: &str) -> bool {
    OK_PHRASES.is_match(body)
}

/// Computes the latest review per reviewer login, keeping only the three
/// states spec.md names (`APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`);
/// reviews expects newest-last ordering, matching the platform's default.
fn latest_review_per_reviewer<'a>(reviews: &'a [Value]) -> HashMap<String, &'a Value> {
    let mut latest = HashMap::new();
    for review in reviews {
        let Some(state) = review.get("state").and_then(Value::as_str) else {
            continue;
        };
        if !matches!(state, "APPROVED" | "CHANGES_REQUESTED" | "COMMENTED") {
            continue;
        }
        let Some(login) = review
            .get("user")
            .and_then(|u| u.get("login"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        latest.insert(login.to_string(), review);
    }
    latest
}

fn verdict_for(review: &Value) -> ReviewerVerdict {
    match review.get("state").and_then(Value::as_str) {
        Some("APPROVED") => ReviewerVerdict::Approved,
        Some("CHANGES_REQUESTED") => ReviewerVerdict::ChangesRequested,
        Some("COMMENTED") => {
            let body = review.get("body").and_then(Value::as_str).unwrap_or("");
            if is_ok_comment(body) {
                ReviewerVerdict::OkComment
            } else {
                ReviewerVerdict::ActionableComment
            }
        }
        _ => ReviewerVerdict::Pending,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    ReviewComment,
    Review,
    Approval,
    NoAction,
}

/// Classifies one PR candidate per spec.md §4.6's decision tree.
pub fn classify_candidate(
    unresolved_threads: bool,
    reviews: &[Value],
    requested_reviewers: &[String],
) -> Classification {
    if unresolved_threads {
        return Classification::ReviewComment;
    }

    let latest = latest_review_per_reviewer(reviews);
    let mut reviewer_count = 0usize;
    let mut approvals = 0usize;
    let mut changes = 0usize;
    let mut ok_comments = 0usize;
    let mut actionable = 0usize;
    let mut pending = 0usize;

    let mut all_reviewers: Vec<&str> = latest.keys().map(String::as_str).collect();
    for reviewer in requested_reviewers {
        if !all_reviewers.contains(&reviewer.as_str()) {
            all_reviewers.push(reviewer);
        }
    }

    for reviewer in all_reviewers {
        reviewer_count += 1;
        match latest.get(reviewer) {
            Some(review) => match verdict_for(review) {
                ReviewerVerdict::Approved => approvals += 1,
                ReviewerVerdict::ChangesRequested => changes += 1,
                ReviewerVerdict::OkComment => ok_comments += 1,
                ReviewerVerdict::ActionableComment => actionable += 1,
                ReviewerVerdict::Pending => pending += 1,
            },
            None => pending += 1,
        }
    }

    if changes > 0 || actionable > 0 {
        return Classification::Review;
    }

    let approved = reviewer_count > 0 && pending == 0 && changes == 0 && actionable == 0 && (approvals + ok_comments) > 0;
    if approved {
        return Classification::Approval;
    }

    Classification::NoAction
}

/// Diffs the currently-applied review-followup labels against the target
/// logical state, returning `(to_add, to_remove)`.
pub fn label_diff(current: &[Label], target: ReviewFollowupLabelState) -> (Vec<Label>, Vec<Label>) {
    let target_labels = target.labels();
    let review_followup_family = [
        Label::ReviewFollowup,
        Label::ReviewFollowupWaiting,
        Label::ReviewFollowupActionRequired,
    ];

    let to_add = target_labels
        .iter()
        .filter(|l| !current.contains(l))
        .copied()
        .collect();
    let to_remove = review_followup_family
        .into_iter()
        .filter(|l| current.contains(l) && !target_labels.contains(l))
        .collect();
    (to_add, to_remove)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoMergeStep {
    Merge,
    RetryLater { reason: String },
    ActionRequired { reason: String },
    Done,
}

/// The gate check of the auto-merge state machine (spec.md §4.6 "Gate").
/// Pure given the facts already fetched about the PR; the polling
/// (`WaitMergeable`) and mutation (`Merge`/`DeleteHead`) steps live in
/// [`run_auto_merge_gate`] since they need the platform client.
pub fn gate(
    is_draft: bool,
    unresolved_threads: bool,
    requested_reviewers: &[String],
    reviews: &[Value],
) -> AutoMergeStep {
    if is_draft {
        return AutoMergeStep::RetryLater {
            reason: "draft".to_string(),
        };
    }
    if unresolved_threads {
        return AutoMergeStep::RetryLater {
            reason: "unresolved_review_threads".to_string(),
        };
    }
    if !requested_reviewers.is_empty() {
        return AutoMergeStep::RetryLater {
            reason: "awaiting_reviewer_feedback".to_string(),
        };
    }

    let latest = latest_review_per_reviewer(reviews);
    for review in latest.values() {
        if verdict_for(review) == ReviewerVerdict::ActionableComment {
            return AutoMergeStep::ActionRequired {
                reason: "actionable_review_feedback".to_string(),
            };
        }
    }

    let classification = classify_candidate(unresolved_threads, reviews, requested_reviewers);
    if classification != Classification::Approval {
        return AutoMergeStep::ActionRequired {
            reason: "not_approved".to_string(),
        };
    }

    AutoMergeStep::Merge
}

/// Chooses the merge method from the repo's allowed methods, preferring
/// squash, then merge, then rebase (spec.md §4.6 "Merge").
pub fn preferred_merge_method(allowed: &[&str]) -> Option<&'static str> {
    for candidate in ["squash", "merge", "rebase"] {
        if allowed.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Classifies a merge-attempt failure message into a retry-vs-escalate
/// outcome (spec.md §4.6 "Merge").
pub fn classify_merge_failure(message: &str) -> AutoMergeStep {
    let lower = message.to_lowercase();
    if lower.contains("method not allowed") {
        return AutoMergeStep::RetryLater {
            reason: format!("method_not_allowed:{message}"),
        };
    }
    if lower.contains("not mergeable") || lower.contains("merge conflict") || lower.contains("base branch was modified") {
        return AutoMergeStep::RetryLater {
            reason: format!("transient_mergeability:{message}"),
        };
    }
    AutoMergeStep::ActionRequired {
        reason: format!("merge_failed:{message}"),
    }
}

/// Runs the `WaitMergeable` → `Merge` → `DeleteHead` tail of the state
/// machine against the live platform. `Gate` must already have returned
/// `Merge` before this is called.
pub async fn run_merge_sequence(
    client: &dyn crate::platform::Client,
    owner: &str,
    repo: &str,
    number: u64,
    allowed_methods: &[&str],
) -> Result<AutoMergeStep> {
    let mut mergeable_state = None;
    let mut last_pr = Value::Null;
    for _ in 0..10 {
        let pr = client
            .get_pull_request(owner, repo, number)
            .await
            .context("polling mergeable state")?;
        if let Some(state) = pr.get("mergeable_state").and_then(Value::as_str) {
            mergeable_state = Some(state.to_string());
            let is_decided = pr.get("mergeable").is_some_and(|m| !m.is_null());
            last_pr = pr;
            if is_decided {
                break;
            }
        } else {
            last_pr = pr;
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }

    match mergeable_state.as_deref() {
        Some("clean") => {}
        Some(other) => {
            return Ok(AutoMergeStep::RetryLater {
                reason: format!("not_mergeable:{other}"),
            })
        }
        None => {
            return Ok(AutoMergeStep::RetryLater {
                reason: "not_mergeable:unknown".to_string(),
            })
        }
    }

    let Some(method) = preferred_merge_method(allowed_methods) else {
        return Ok(AutoMergeStep::ActionRequired {
            reason: "merge_failed:no allowed merge method".to_string(),
        });
    };

    match client.merge_pull_request(owner, repo, number, method).await {
        Ok(_) => {
            if let Some(head_ref) = same_repo_head_branch(&last_pr, owner, repo) {
                client.delete_ref(owner, repo, &format!("heads/{head_ref}")).await.ok();
            }
            Ok(AutoMergeStep::Done)
        }
        Err(err) => Ok(classify_merge_failure(&err.to_string())),
    }
}

/// Returns the PR's head branch name, but only when the head repo is the
/// same as the base repo (`owner/repo`) — the orchestrator has no
/// authority to delete a ref in a fork, so a cross-repo PR's head branch
/// is left alone (spec.md §4.6 "DeleteHead").
fn same_repo_head_branch(pr: &Value, owner: &str, repo: &str) -> Option<String> {
    let head = pr.get("head")?;
    let head_repo_full_name = head.get("repo")?.get("full_name")?.as_str()?;
    if head_repo_full_name != format!("{owner}/{repo}") {
        return None;
    }
    head.get("ref")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(login: &str, state: &str, body: &str) -> Value {
        json!({ "user": { "login": login }, "state": state, "body": body })
    }

    #[test]
    fn unresolved_threads_always_classify_as_review_comment() {
        let classification = classify_candidate(true, &[], &[]);
        assert_eq!(classification, Classification::ReviewComment);
    }

    #[test]
    fn changes_requested_classifies_as_review() {
        let reviews = vec![review("alice", "CHANGES_REQUESTED", "")];
        assert_eq!(
            classify_candidate(false, &reviews, &[]),
            Classification::Review
        );
    }

    #[test]
    fn all_approved_classifies_as_approval() {
        let reviews = vec![review("alice", "APPROVED", ""), review("bob", "APPROVED", "")];
        assert_eq!(
            classify_candidate(false, &reviews, &[]),
            Classification::Approval
        );
    }

    #[test]
    fn ok_phrase_comment_counts_toward_approval() {
        let reviews = vec![review("alice", "COMMENTED", "LGTM, nice work")];
        assert_eq!(
            classify_candidate(false, &reviews, &[]),
            Classification::Approval
        );
    }

    #[test]
    fn actionable_comment_classifies_as_review() {
        let reviews = vec![review("alice", "COMMENTED", "please rename this variable")];
        assert_eq!(
            classify_candidate(false, &reviews, &[]),
            Classification::Review
        );
    }

    #[test]
    fn pending_requested_reviewer_blocks_approval() {
        let reviews = vec![review("alice", "APPROVED", "")];
        let requested = vec!["bob".to_string()];
        assert_eq!(
            classify_candidate(false, &reviews, &requested),
            Classification::NoAction
        );
    }

    #[test]
    fn label_diff_computes_add_and_remove_sets() {
        let current = vec![Label::ReviewFollowup, Label::ReviewFollowupWaiting];
        let (add, remove) = label_diff(&current, ReviewFollowupLabelState::ActionRequired);
        assert_eq!(add, vec![Label::ReviewFollowupActionRequired]);
        assert!(remove.contains(&Label::ReviewFollowup));
        assert!(remove.contains(&Label::ReviewFollowupWaiting));
    }

    #[test]
    fn gate_blocks_draft_prs() {
        assert_eq!(
            gate(true, false, &[], &[]),
            AutoMergeStep::RetryLater {
                reason: "draft".to_string()
            }
        );
    }

    #[test]
    fn preferred_merge_method_prefers_squash() {
        assert_eq!(preferred_merge_method(&["merge", "squash", "rebase"]), Some("squash"));
        assert_eq!(preferred_merge_method(&["rebase"]), Some("rebase"));
        assert_eq!(preferred_merge_method(&[]), None);
    }

    #[test]
    fn merge_failure_classification_distinguishes_transient_from_fatal() {
        assert_eq!(
            classify_merge_failure("Merge method not allowed for this repository"),
            AutoMergeStep::RetryLater {
                reason: "method_not_allowed:Merge method not allowed for this repository".to_string()
            }
        );
        assert_eq!(
            classify_merge_failure("Head branch is out of date"),
            AutoMergeStep::ActionRequired {
                reason: "merge_failed:Head branch is out of date".to_string()
            }
        );
    }

    #[test]
    fn same_repo_head_branch_returns_ref_when_head_repo_matches_base() {
        let pr = json!({
            "head": { "ref": "feature-branch", "repo": { "full_name": "acme/widgets" } }
        });
        assert_eq!(
            same_repo_head_branch(&pr, "acme", "widgets"),
            Some("feature-branch".to_string())
        );
    }

    #[test]
    fn same_repo_head_branch_is_none_for_a_fork() {
        let pr = json!({
            "head": { "ref": "feature-branch", "repo": { "full_name": "contributor/widgets" } }
        });
        assert_eq!(same_repo_head_branch(&pr, "acme", "widgets"), None);
    }
}
