//! `state/issue-sessions.json` — `item_id -> SessionRecord` map.
//!
//! Design Note §9(b) resolves the file-vs-SQLite ambiguity in favor of the
//! file-based JSON store, consistent with every other Durable Store record
//! in this crate (spec.md §6 lists `issue-sessions.json` as the non-SQLite
//! option). Invariant I4 (monotonic `updated_at`) is enforced by
//! [`SessionRecord::with_update`], not re-checked here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use agent_runner_types::SessionRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("issue-sessions.json")
}

pub fn load(state_dir: &Path) -> Result<BTreeMap<String, SessionRecord>> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, sessions: &BTreeMap<String, SessionRecord>) -> Result<()> {
    json_file::write_json(&path(state_dir), sessions)
}

/// Insert or update the session for `item_id`, respecting I4 via
/// `SessionRecord::with_update`.
pub fn update(
    sessions: &mut BTreeMap<String, SessionRecord>,
    item_id: &str,
    session_token: String,
    at: DateTime<Utc>,
) {
    let updated = match sessions.get(item_id) {
        Some(existing) => existing.with_update(session_token, at),
        None => SessionRecord {
            item_id: item_id.to_string(),
            session_token,
            updated_at: at,
        },
    };
    sessions.insert(item_id.to_string(), updated);
}

/// Explicit reset, clearing the session as spec.md §3 allows.
pub fn clear(sessions: &mut BTreeMap<String, SessionRecord>, item_id: &str) {
    sessions.remove(item_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn update_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let mut sessions = load(dir.path()).unwrap();
        let now = Utc::now();
        update(&mut sessions, "i1", "tok-1".into(), now);
        save(dir.path(), &sessions).unwrap();

        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded["i1"].session_token, "tok-1");
    }

    #[test]
    fn clear_removes_the_entry() {
        let mut sessions = BTreeMap::new();
        update(&mut sessions, "i1", "tok-1".into(), Utc::now());
        clear(&mut sessions, "i1");
        assert!(sessions.is_empty());
    }
}
