//! Outcome Handling (spec.md §4.7): maps a Supervisor return into label
//! transitions, comment content, and retry/session bookkeeping.

use agent_runner_types::Label;

use crate::supervisor::{FailureKind, RunStatus, SupervisorOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTransition {
    pub remove: Vec<Label>,
    pub add: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    CompletionComment { summary: Option<String> },
    MarkerComment { body: String },
    FailureMarkerComment { reason: String },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeDecision {
    pub transition: LabelTransition,
    pub post: PostAction,
    pub schedule_retry: bool,
    pub clear_session: bool,
}

/// Decides the label/comment/retry outcome of one Supervisor run, per
/// spec.md §4.7's four-way split (`done`, `needs_user_reply`,
/// `failure_kind = quota`, other failure).
pub fn decide(outcome: &SupervisorOutcome) -> OutcomeDecision {
    if outcome.success {
        if outcome.status == Some(RunStatus::NeedsUserReply) {
            return OutcomeDecision {
                transition: LabelTransition {
                    remove: vec![Label::Queued, Label::Running],
                    add: vec![Label::NeedsUserReply],
                },
                post: PostAction::MarkerComment {
                    body: outcome.summary.clone().unwrap_or_default(),
                },
                schedule_retry: false,
                clear_session: false,
            };
        }
        return OutcomeDecision {
            transition: LabelTransition {
                remove: vec![Label::Queued, Label::Running, Label::NeedsUserReply],
                add: vec![Label::Done],
            },
            post: PostAction::CompletionComment {
                summary: outcome.summary.clone(),
            },
            schedule_retry: false,
            clear_session: false,
        };
    }

    if outcome.failure_kind == Some(FailureKind::Quota) {
        return OutcomeDecision {
            transition: LabelTransition {
                remove: vec![Label::Running],
                add: vec![Label::Queued],
            },
            post: PostAction::None,
            schedule_retry: true,
            clear_session: false,
        };
    }

    let reason = outcome
        .failure_kind
        .as_ref()
        .map(|k| k.as_str().to_string())
        .unwrap_or_else(|| "execution_error".to_string());

    OutcomeDecision {
        transition: LabelTransition {
            remove: vec![Label::Running],
            add: vec![Label::Failed],
        },
        post: PostAction::FailureMarkerComment { reason },
        schedule_retry: false,
        clear_session: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_outcome() -> SupervisorOutcome {
        SupervisorOutcome {
            success: true,
            exit_code: Some(0),
            log_path: PathBuf::from("/tmp/test.log"),
            failure_kind: None,
            failure_stage: None,
            failure_detail: None,
            quota_resume_at: None,
            session_token: None,
            summary: Some("fixed it".to_string()),
            status: Some(RunStatus::Done),
        }
    }

    #[test]
    fn done_status_adds_done_label_and_posts_completion_comment() {
        let decision = decide(&base_outcome());
        assert_eq!(decision.transition.add, vec![Label::Done]);
        assert!(matches!(decision.post, PostAction::CompletionComment { .. }));
    }

    #[test]
    fn needs_user_reply_adds_that_label_and_posts_marker() {
        let mut outcome = base_outcome();
        outcome.status = Some(RunStatus::NeedsUserReply);
        let decision = decide(&outcome);
        assert_eq!(decision.transition.add, vec![Label::NeedsUserReply]);
        assert!(matches!(decision.post, PostAction::MarkerComment { .. }));
    }

    #[test]
    fn quota_failure_requeues_and_schedules_retry_preserving_session() {
        let mut outcome = base_outcome();
        outcome.success = false;
        outcome.status = None;
        outcome.failure_kind = Some(FailureKind::Quota);
        let decision = decide(&outcome);
        assert_eq!(decision.transition.add, vec![Label::Queued]);
        assert!(decision.schedule_retry);
        assert!(!decision.clear_session);
    }

    #[test]
    fn other_failure_marks_failed_with_classified_reason() {
        let mut outcome = base_outcome();
        outcome.success = false;
        outcome.status = None;
        outcome.failure_kind = Some(FailureKind::ExecutionError);
        let decision = decide(&outcome);
        assert_eq!(decision.transition.add, vec![Label::Failed]);
        match decision.post {
            PostAction::FailureMarkerComment { reason } => assert_eq!(reason, "execution_error"),
            other => panic!("expected failure marker comment, got {other:?}"),
        }
    }
}
