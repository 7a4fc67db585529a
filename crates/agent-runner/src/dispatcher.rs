//! Dispatcher & Stalled-State Recovery (spec.md §4.5, §5).
//!
//! Global + per-provider `tokio::sync::Semaphore`s gate how many workers
//! run concurrently; a per-repo lock (via [`agent_runner_lock`]) ensures at
//! most one run is active per repository. Grounded in shape on the
//! teacher's bounded-worker-pool pattern (`engine_parallel.rs`'s semaphore-
//! gated `spawn` loop), generalized from one global cap to the
//! multi-dimensional {global, per-provider} cap spec.md §5 requires.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use agent_runner_lock::{acquire_repo_lock, is_pid_alive};
use agent_runner_types::{ActivityRecord, RepoRef};
use anyhow::Result;

/// One dispatch candidate, already merged and priority-ordered by the
/// caller (stalled-recovery > scheduled-retry > webhook > reconciler >
/// idle > review-followup, spec.md §5 "Ordering guarantees").
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    pub repo: RepoRef,
    pub item_id: String,
    pub provider: String,
}

/// Holds the global slot semaphore plus one semaphore per provider name.
/// Cheap to clone (all fields are `Arc`); construct once per process.
#[derive(Clone)]
pub struct SlotPool {
    global: Arc<tokio::sync::Semaphore>,
    per_provider: Arc<HashMap<String, Arc<tokio::sync::Semaphore>>>,
}

impl SlotPool {
    pub fn new(global_capacity: usize, provider_capacities: HashMap<String, usize>) -> Self {
        let per_provider = provider_capacities
            .into_iter()
            .map(|(name, cap)| (name, Arc::new(tokio::sync::Semaphore::new(cap.max(1)))))
            .collect();
        Self {
            global: Arc::new(tokio::sync::Semaphore::new(global_capacity.max(1))),
            per_provider: Arc::new(per_provider),
        }
    }

    /// Attempts to non-blockingly acquire both a global and a per-provider
    /// slot for `provider`. Returns `None` if either is unavailable, per
    /// spec.md's "non-blocking `try_acquire`" scheduling note — workers
    /// never queue up behind a full semaphore, they just skip this tick.
    pub fn try_acquire(&self, provider: &str) -> Option<SlotGuard> {
        let global_permit = self.global.clone().try_acquire_owned().ok()?;
        let provider_sem = self.per_provider.get(provider)?.clone();
        let provider_permit = provider_sem.try_acquire_owned().ok()?;
        Some(SlotGuard {
            _global_permit: global_permit,
            _provider_permit: provider_permit,
        })
    }
}

/// RAII guard releasing both slots on drop (automatic via
/// `OwnedSemaphorePermit`'s own `Drop`).
pub struct SlotGuard {
    _global_permit: tokio::sync::OwnedSemaphorePermit,
    _provider_permit: tokio::sync::OwnedSemaphorePermit,
}

/// Merges already-prioritized candidate lists into one dispatch order,
/// preserving arrival order within each tier (spec.md §5).
pub fn merge_by_priority(
    stalled_recovery: Vec<DispatchCandidate>,
    scheduled_retry: Vec<DispatchCandidate>,
    webhook: Vec<DispatchCandidate>,
    reconciler: Vec<DispatchCandidate>,
    idle: Vec<DispatchCandidate>,
    review_followup: Vec<DispatchCandidate>,
) -> Vec<DispatchCandidate> {
    stalled_recovery
        .into_iter()
        .chain(scheduled_retry)
        .chain(webhook)
        .chain(reconciler)
        .chain(idle)
        .chain(review_followup)
        .collect()
}

/// Detects Activity records whose PID is no longer alive: the process
/// crashed or was killed without the orchestrator observing its exit
/// (spec.md §4.5 "Stalled-State Recovery"), so the item should be
/// re-queued.
pub fn find_stalled(activities: &[ActivityRecord]) -> Vec<&ActivityRecord> {
    activities
        .iter()
        .filter(|a| !is_pid_alive(a.pid))
        .collect()
}

/// Acquires the per-repo lock for the duration of one dispatch attempt.
/// Blocking (bounded by `timeout`) since "at most one run per repo" must
/// hold even when two workers race for the same repository.
pub async fn with_repo_lock<F, Fut, R>(state_dir: &Path, repo: &RepoRef, work: F) -> Result<R>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let lock_dir = state_dir.join("repo-locks");
    let lock_path = lock_dir.join(format!("{}.lock", repo.lock_key()));
    let guard = tokio::task::spawn_blocking(move || acquire_repo_lock(&lock_path)).await??;
    let result = work().await;
    drop(guard);
    result
}

/// Acquires the per-repo git cache lock (spec.md §4.1: a second lock
/// family, separate from `repo-locks/`, guarding the shared git cache a
/// clone/fetch populates before the working tree copy is made). Same
/// acquisition semantics as [`with_repo_lock`], different directory.
pub async fn with_git_cache_lock<F, Fut, R>(state_dir: &Path, repo: &RepoRef, work: F) -> Result<R>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let lock_dir = state_dir.join("git-cache-locks");
    let lock_path = lock_dir.join(format!("{}.lock", repo.lock_key()));
    let guard = tokio::task::spawn_blocking(move || acquire_repo_lock(&lock_path)).await??;
    let result = work().await;
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_tier_order_and_within_tier_arrival() {
        fn candidate(id: &str) -> DispatchCandidate {
            DispatchCandidate {
                repo: RepoRef::new("o", "r"),
                item_id: id.to_string(),
                provider: "primary".to_string(),
            }
        }
        let merged = merge_by_priority(
            vec![candidate("stalled-1")],
            vec![candidate("retry-1"), candidate("retry-2")],
            vec![],
            vec![candidate("recon-1")],
            vec![],
            vec![candidate("review-1")],
        );
        let ids: Vec<&str> = merged.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["stalled-1", "retry-1", "retry-2", "recon-1", "review-1"]
        );
    }

    #[tokio::test]
    async fn slot_pool_denies_acquisition_once_exhausted() {
        let mut caps = HashMap::new();
        caps.insert("primary".to_string(), 1);
        let pool = SlotPool::new(1, caps);
        let first = pool.try_acquire("primary");
        assert!(first.is_some());
        let second = pool.try_acquire("primary");
        assert!(second.is_none());
        drop(first);
        let third = pool.try_acquire("primary");
        assert!(third.is_some());
    }

    #[test]
    fn unknown_provider_denies_acquisition() {
        let pool = SlotPool::new(4, HashMap::new());
        assert!(pool.try_acquire("unknown-provider").is_none());
    }
}
