//! Idle Scheduler (spec.md §3 "Idle History", §6 idle config): selects
//! repositories and rotates tasks when there is spare capacity and no
//! pending user work, subject to per-cooldown and per-cycle caps.

use chrono::{DateTime, Utc};

use agent_runner_types::IdleHistory;

use crate::config::IdleConfig;

#[derive(Debug, Clone)]
pub struct IdleCandidate {
    pub repo: String,
    pub task: String,
}

/// Chooses up to `config.max_runs_per_cycle` idle candidates across
/// `scope_repos`, skipping any repo whose last idle run is still within
/// `cooldown_minutes`, and rotating `config.tasks` via `history`'s cursor
/// (shared across repos, matching the single `task_cursor` the type
/// carries).
pub fn select_idle_candidates(
    config: &IdleConfig,
    scope_repos: &[String],
    history: &mut IdleHistory,
    now: DateTime<Utc>,
) -> Vec<IdleCandidate> {
    if !config.enabled || config.tasks.is_empty() {
        return Vec::new();
    }

    let cooldown = chrono::Duration::minutes(config.cooldown_minutes as i64);
    let mut candidates = Vec::new();

    for repo in scope_repos {
        if candidates.len() >= config.max_runs_per_cycle {
            break;
        }
        let cooled_down = history
            .repos
            .get(repo)
            .is_none_or(|state| now - state.last_run_at >= cooldown);
        if !cooled_down {
            continue;
        }
        let Some(task) = history.next_task(&config.tasks) else {
            break;
        };
        candidates.push(IdleCandidate {
            repo: repo.clone(),
            task: task.to_string(),
        });
    }

    candidates
}

/// Records that `repo` just ran `task` as an idle run, for the next
/// cooldown check.
pub fn record_idle_run(history: &mut IdleHistory, repo: &str, task: &str, now: DateTime<Utc>) {
    history.repos.insert(
        repo.to_string(),
        agent_runner_types::IdleRepoState {
            last_run_at: now,
            last_task: task.to_string(),
        },
    );
}

/// Whether a provider's reported usage percentage clears the configured
/// gate (spec.md §6 `idle.usageGate`/`copilotUsageGate`/`geminiUsageGate`):
/// idle work only runs below the gate, leaving headroom for user-driven
/// work.
pub fn usage_gate_allows(percent_used: f64, gate: Option<f64>) -> bool {
    match gate {
        Some(gate) => percent_used <= gate,
        None => true,
    }
}
