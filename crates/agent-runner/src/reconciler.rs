//! Reconciler (spec.md §4.4): per-tick, per-repository pass that labels new
//! request items, harvests inline `/agent run` commands, and resolves the
//! in-scope repository set.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use agent_runner_store::Store;
use agent_runner_types::{Label, RepoCache, RepoRef, WorkItem};

use crate::commands::{parse_agent_command, AgentCommand};
use crate::config::RunnerConfig;
use crate::platform::Client;
use crate::templating::parse_repo_list;

/// A queued item chosen for dispatch this tick, carrying the command that
/// surfaced it (if any) so the Dispatcher can tell apart a fresh
/// `request`-label pickup from an inline `/agent run`.
#[derive(Debug, Clone)]
pub struct ReconciledItem {
    pub item: WorkItem,
    pub command: Option<AgentCommand>,
    pub target_repos: Vec<String>,
}

/// Label transition decided for an item newly seen with the `request`
/// label and no terminal label yet.
pub fn needs_queued_label(item: &WorkItem) -> bool {
    item.has_label(Label::Request) && !item.is_terminal()
}

/// Items eligible for dispatch this tick: labeled `queued`, excluding
/// anything also labeled `running` or `needs-user-reply`, sorted by item
/// number ascending, truncated to `capacity`.
pub fn select_dispatch_candidates(items: &[WorkItem], capacity: usize) -> Vec<&WorkItem> {
    let mut eligible: Vec<&WorkItem> = items
        .iter()
        .filter(|item| {
            item.has_label(Label::Queued)
                && !item.has_label(Label::Running)
                && !item.has_label(Label::NeedsUserReply)
        })
        .collect();
    eligible.sort_by_key(|item| item.number);
    eligible.into_iter().take(capacity).collect()
}

/// Harvests `/agent run` (and sibling) commands from an item's comments,
/// skipping comments already recorded in the processed-commands store
/// (at-most-once handling, spec.md §4.4 step 3).
pub fn harvest_commands(item: &WorkItem, store: &Store) -> Result<Vec<AgentCommand>> {
    let mut commands = Vec::new();
    for comment in &item.comments {
        if let Some(command) = parse_agent_command(&comment.body, comment.author_association) {
            if store.mark_command_processed(&comment.id)? {
                commands.push(command);
            }
        }
    }
    Ok(commands)
}

/// Resolves the target-repo set named in an item's body (spec.md §4.4
/// step 4): thin wrapper over [`parse_repo_list`] kept here so call sites
/// reach for one module.
pub fn resolve_target_repos(item: &WorkItem) -> Vec<String> {
    parse_repo_list(&item.body)
}

/// Locally present repos: child directories of `workdir_root` containing a
/// `.git` directory, excluding any name in `exclude`. Last-resort fallback
/// when both the platform API and the repo cache are unavailable (spec.md
/// §4.4 "In-scope repository set").
pub fn locally_present_repos(workdir_root: &Path, exclude: &HashSet<String>) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(workdir_root) else {
        return Vec::new();
    };
    let mut repos = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if exclude.contains(name) {
            continue;
        }
        if path.join(".git").is_dir() {
            repos.push(name.to_string());
        }
    }
    repos.sort();
    repos
}

/// Resolves the in-scope repository set per spec.md §4.4: fresh or
/// rate-limit-blocked cache wins outright; otherwise call the platform,
/// falling back to the cache (even if stale) on rate-limit, and finally to
/// locally present repos if the cache itself is empty.
pub async fn resolve_in_scope_repos(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    exclude: &HashSet<String>,
) -> Result<Vec<String>> {
    let now = Utc::now();
    let mut cache = store.load_repo_cache()?;

    let max_age = chrono::Duration::minutes(config.repo_cache_max_age_minutes as i64);
    if cache.is_fresh(now, max_age) || cache.is_blocked(now) {
        return Ok(cache.repos.clone());
    }

    match client.list_org_repos(&config.owner).await {
        Ok(repos) => {
            cache = RepoCache {
                repos: repos.clone(),
                updated_at: Some(now),
                blocked_until: None,
            };
            store.save_repo_cache(&cache)?;
            Ok(repos)
        }
        Err(err) => {
            tracing::warn!(error = %err, "platform repo listing failed, falling back");
            if !cache.repos.is_empty() {
                cache.blocked_until = Some(now + chrono::Duration::minutes(15));
                store.save_repo_cache(&cache)?;
                Ok(cache.repos)
            } else {
                Ok(locally_present_repos(&config.workdir_root, exclude))
            }
        }
    }
}

pub fn repo_ref(owner: &str, name: &str) -> RepoRef {
    RepoRef::new(owner, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_types::{Association, Comment, ItemKind};
    use chrono::Utc;

    fn item(number: u64, labels: Vec<Label>) -> WorkItem {
        WorkItem {
            repo: RepoRef::new("acme", "widgets"),
            number,
            id: format!("i{number}"),
            kind: ItemKind::Issue,
            labels,
            author_login: "alice".to_string(),
            title: "t".to_string(),
            body: String::new(),
            url: "u".to_string(),
            comments: Vec::new(),
        }
    }

    #[test]
    fn select_dispatch_candidates_excludes_running_and_sorts_ascending() {
        let items = vec![
            item(3, vec![Label::Queued]),
            item(1, vec![Label::Queued, Label::Running]),
            item(2, vec![Label::Queued]),
        ];
        let picked = select_dispatch_candidates(&items, 10);
        let numbers: Vec<u64> = picked.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn select_dispatch_candidates_respects_capacity() {
        let items = vec![item(1, vec![Label::Queued]), item(2, vec![Label::Queued])];
        assert_eq!(select_dispatch_candidates(&items, 1).len(), 1);
    }

    #[test]
    fn needs_queued_label_only_for_non_terminal_request_items() {
        assert!(needs_queued_label(&item(1, vec![Label::Request])));
        assert!(!needs_queued_label(&item(
            1,
            vec![Label::Request, Label::Done]
        )));
    }

    #[test]
    fn harvest_commands_is_at_most_once_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut it = item(1, vec![Label::Queued]);
        it.comments.push(Comment {
            id: "c1".to_string(),
            author_login: "bob".to_string(),
            author_association: Association::Owner,
            body: "/agent run".to_string(),
            created_at: Utc::now(),
        });
        let first = harvest_commands(&it, &store).unwrap();
        assert_eq!(first.len(), 1);
        let second = harvest_commands(&it, &store).unwrap();
        assert!(second.is_empty());
    }
}
