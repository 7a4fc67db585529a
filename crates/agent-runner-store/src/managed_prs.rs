//! `state/managed-pull-requests.json` + sibling `.lock` — the bounded
//! ordered set of PRs authored by the orchestrator's own identity
//! (spec.md §3 "Managed-PR Set"). Appends happen under the short lock via
//! [`json_file::with_locked`] since both the Dispatcher and the Review
//! Follow-up Engine can append concurrently.

use std::path::{Path, PathBuf};

use agent_runner_types::{ManagedPrEntry, ManagedPrSet};
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("managed-pull-requests.json")
}

pub fn load(state_dir: &Path) -> Result<ManagedPrSet> {
    json_file::read_json_or_default(&path(state_dir))
}

/// Append `entry` under the store's short lock (I3 bound enforced by
/// [`ManagedPrSet::push`]).
pub fn push(state_dir: &Path, entry: ManagedPrEntry) -> Result<()> {
    json_file::with_locked::<ManagedPrSet, ()>(&path(state_dir), |set| {
        set.push(entry);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::RepoRef;
    use tempfile::tempdir;

    #[test]
    fn push_persists_across_reloads() {
        let dir = tempdir().unwrap();
        push(
            dir.path(),
            ManagedPrEntry {
                repo: RepoRef::new("o", "r"),
                number: 7,
            },
        )
        .unwrap();

        let set = load(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
    }
}
