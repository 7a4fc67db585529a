//! `state/repos.json` — last-known in-scope repository list for "all
//! repos of the owner" mode (spec.md §3 "Repo Cache").

use std::path::{Path, PathBuf};

use agent_runner_types::RepoCache;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("repos.json")
}

pub fn load(state_dir: &Path) -> Result<RepoCache> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, cache: &RepoCache) -> Result<()> {
    json_file::write_json(&path(state_dir), cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn round_trips() {
        let dir = tempdir().unwrap();
        let cache = RepoCache {
            repos: vec!["o/r".into()],
            updated_at: Some(Utc::now()),
            blocked_until: None,
        };
        save(dir.path(), &cache).unwrap();
        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.repos, cache.repos);
    }
}
