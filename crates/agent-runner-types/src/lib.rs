//! Shared data model for the agent-runner orchestrator.
//!
//! Every record here is plain serde data: no I/O, no locking, no platform
//! calls. `agent-runner-store` persists these to disk; `agent-runner`
//! mutates them.

pub mod activity;
pub mod idle;
pub mod item;
pub mod processed_commands;
pub mod queue;
pub mod quota;
pub mod repo_cache;
pub mod review;
pub mod session;

pub use activity::{ActivityKind, ActivityRecord, RunningIssueRecord};
pub use idle::{IdleHistory, IdleRepoState};
pub use item::{Association, ItemId, ItemKind, Label, RepoRef, WorkItem};
pub use processed_commands::ProcessedCommandSet;
pub use queue::{
    ManagedPrEntry, ManagedPrSet, ScheduledRetryRecord, WebhookQueueEntry, WebhookQueueReason,
};
pub use quota::{GeminiCapacityBackoff, ProviderQuotaSnapshot};
pub use repo_cache::RepoCache;
pub use review::{ReviewFollowupLabelState, ReviewQueueEntry, ReviewReason};
pub use session::SessionRecord;
