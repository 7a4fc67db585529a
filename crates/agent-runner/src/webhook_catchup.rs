//! Webhook catch-up scan (spec.md §4.8 "Catch-up scan"): periodically
//! searches the platform for open items matching the request label or
//! carrying `/agent run` in comments, re-enqueuing anything the webhook
//! stream missed. Last-run timestamp persisted to `webhook-catchup.json`,
//! a file `agent-runner-store` deliberately leaves out of its scope (it
//! belongs to this module, not the generic durable-store layer).

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_runner_store::json_file;
use agent_runner_types::{RepoRef, WebhookQueueEntry, WebhookQueueReason};

use crate::platform::Client;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatchupState {
    last_run_at: Option<DateTime<Utc>>,
}

fn state_path(state_dir: &Path) -> std::path::PathBuf {
    state_dir.join("webhook-catchup.json")
}

pub fn is_due(state_dir: &Path, interval_minutes: u64, now: DateTime<Utc>) -> Result<bool> {
    let state: CatchupState = json_file::read_json_or_default(&state_path(state_dir))?;
    Ok(match state.last_run_at {
        Some(last) => now - last >= chrono::Duration::minutes(interval_minutes as i64),
        None => true,
    })
}

/// Runs one catch-up pass: search for `label:<request_label>` and items
/// carrying `/agent run` across `owner`, re-enqueue up to
/// `max_issues_per_run` candidates not already represented, then persist
/// the run timestamp.
pub async fn run_catchup(
    state_dir: &Path,
    client: &dyn Client,
    owner: &str,
    request_label: &str,
    max_issues_per_run: usize,
    now: DateTime<Utc>,
) -> Result<usize> {
    let label_query = format!("org:{owner} is:open label:{request_label}");
    let comment_query = format!("org:{owner} is:open \"/agent run\" in:comments");

    let mut found = Vec::new();
    for query in [label_query, comment_query] {
        found.extend(client.search_issues(&query).await?);
        if found.len() >= max_issues_per_run {
            break;
        }
    }
    found.truncate(max_issues_per_run);

    let mut enqueued = 0usize;
    let store = agent_runner_store::Store::new(state_dir.to_path_buf());
    for item in &found {
        let Some((owner_name, repo_name, number)) = repo_and_number(item) else {
            continue;
        };
        let item_id = item
            .get("node_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{owner_name}/{repo_name}#{number}"));
        store.push_webhook_queue_entry(WebhookQueueEntry {
            item_id,
            repo: RepoRef::new(owner_name, repo_name),
            number,
            reason: WebhookQueueReason::Webhook,
            enqueued_at: now,
        })?;
        enqueued += 1;
    }

    json_file::write_json(&state_path(state_dir), &CatchupState { last_run_at: Some(now) })?;
    Ok(enqueued)
}

fn repo_and_number(item: &Value) -> Option<(String, String, u64)> {
    let url = item.get("repository_url").and_then(Value::as_str)?;
    let mut segments = url.rsplit('/');
    let repo_name = segments.next()?.to_string();
    let owner_name = segments.next()?.to_string();
    let number = item.get("number").and_then(Value::as_u64)?;
    Some((owner_name, repo_name, number))
}
