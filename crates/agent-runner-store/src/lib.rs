//! Durable JSON state layer: one file per record family under
//! `<workdir>/agent-runner/state/` (spec.md §6 "State directory layout"),
//! all sharing [`json_file`]'s atomic-write-via-rename primitive.
//!
//! Grounded on the teacher's `crates/shipper/src/state.rs`: `load_state`/
//! `save_state` (absent-file-tolerant read, create-dir-all + atomic write)
//! generalized from one `ExecutionState` document into independent
//! single-purpose tables (Design Note §9: Activity/Running-Issue/Session
//! each has a distinct lifetime, so one merged document would mean
//! partial-update races).
//!
//! Writable stores that more than one process can race to append to
//! (managed-PRs, review queue, webhook queue) take a sibling `.lock` file
//! via [`agent_runner_lock::acquire_short_lock`] around their read-modify-
//! write cycle; read-mostly stores (sessions, idle history, repo cache,
//! gemini backoff, activity/running) do not, matching spec.md §4.1's
//! "Per-state file short locks" scope.

pub mod activity;
pub mod gemini_backoff;
pub mod idle_history;
pub mod json_file;
pub mod managed_prs;
pub mod processed_commands;
pub mod repo_cache;
pub mod review_queue;
pub mod running_issues;
pub mod scheduled_retries;
pub mod sessions;
pub mod webhook_queue;

use std::path::{Path, PathBuf};

/// Handle bundling the `state/` directory all store modules read and write
/// under. Cheap to clone (one `PathBuf`); construct once in `main()`/
/// `Config::load` and pass down, per Design Note §9(c) (no global lookups).
#[derive(Debug, Clone)]
pub struct Store {
    state_dir: PathBuf,
}

impl Store {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn load_activity(&self) -> anyhow::Result<Vec<agent_runner_types::ActivityRecord>> {
        activity::load(&self.state_dir)
    }

    pub fn save_activity(&self, records: &[agent_runner_types::ActivityRecord]) -> anyhow::Result<()> {
        activity::save(&self.state_dir, records)
    }

    pub fn load_sessions(
        &self,
    ) -> anyhow::Result<std::collections::BTreeMap<String, agent_runner_types::SessionRecord>> {
        sessions::load(&self.state_dir)
    }

    pub fn save_sessions(
        &self,
        map: &std::collections::BTreeMap<String, agent_runner_types::SessionRecord>,
    ) -> anyhow::Result<()> {
        sessions::save(&self.state_dir, map)
    }

    pub fn load_repo_cache(&self) -> anyhow::Result<agent_runner_types::RepoCache> {
        repo_cache::load(&self.state_dir)
    }

    pub fn save_repo_cache(&self, cache: &agent_runner_types::RepoCache) -> anyhow::Result<()> {
        repo_cache::save(&self.state_dir, cache)
    }

    pub fn load_idle_history(&self) -> anyhow::Result<agent_runner_types::IdleHistory> {
        idle_history::load(&self.state_dir)
    }

    pub fn save_idle_history(&self, history: &agent_runner_types::IdleHistory) -> anyhow::Result<()> {
        idle_history::save(&self.state_dir, history)
    }

    pub fn load_gemini_backoff(&self) -> anyhow::Result<agent_runner_types::GeminiCapacityBackoff> {
        gemini_backoff::load(&self.state_dir)
    }

    pub fn save_gemini_backoff(
        &self,
        backoff: &agent_runner_types::GeminiCapacityBackoff,
    ) -> anyhow::Result<()> {
        gemini_backoff::save(&self.state_dir, backoff)
    }

    pub fn push_managed_pr(&self, entry: agent_runner_types::ManagedPrEntry) -> anyhow::Result<()> {
        managed_prs::push(&self.state_dir, entry)
    }

    pub fn load_managed_prs(&self) -> anyhow::Result<agent_runner_types::ManagedPrSet> {
        managed_prs::load(&self.state_dir)
    }

    pub fn upsert_review_queue_entry(
        &self,
        entry: agent_runner_types::ReviewQueueEntry,
    ) -> anyhow::Result<()> {
        review_queue::upsert(&self.state_dir, entry)
    }

    pub fn push_webhook_queue_entry(
        &self,
        entry: agent_runner_types::WebhookQueueEntry,
    ) -> anyhow::Result<()> {
        webhook_queue::push(&self.state_dir, entry)
    }

    pub fn drain_webhook_queue(&self) -> anyhow::Result<Vec<agent_runner_types::WebhookQueueEntry>> {
        webhook_queue::drain(&self.state_dir)
    }

    pub fn mark_command_processed(&self, comment_id: &str) -> anyhow::Result<bool> {
        processed_commands::mark_processed(&self.state_dir, comment_id)
    }
}
