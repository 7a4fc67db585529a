use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleRepoState {
    pub last_run_at: DateTime<Utc>,
    pub last_task: String,
}

/// `{ repo -> {last_run_at, last_task} }` plus a rotating task cursor
/// (spec.md §3 "Idle History").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdleHistory {
    pub repos: BTreeMap<String, IdleRepoState>,
    #[serde(default)]
    pub task_cursor: usize,
}

impl IdleHistory {
    /// Pick the next task from `tasks` by rotating `task_cursor`, wrapping
    /// around. Returns `None` if `tasks` is empty.
    pub fn next_task<'a>(&mut self, tasks: &'a [String]) -> Option<&'a str> {
        if tasks.is_empty() {
            return None;
        }
        let idx = self.task_cursor % tasks.len();
        self.task_cursor = (self.task_cursor + 1) % tasks.len();
        Some(tasks[idx].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_task_rotates_and_wraps() {
        let tasks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut history = IdleHistory::default();
        assert_eq!(history.next_task(&tasks), Some("a"));
        assert_eq!(history.next_task(&tasks), Some("b"));
        assert_eq!(history.next_task(&tasks), Some("c"));
        assert_eq!(history.next_task(&tasks), Some("a"));
    }

    #[test]
    fn next_task_on_empty_list_is_none() {
        let mut history = IdleHistory::default();
        assert_eq!(history.next_task(&[]), None);
    }
}
