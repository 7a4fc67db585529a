//! Dispatch Pipeline (spec.md §4.4 "Reconciler" + §4.5 "Dispatch algorithm
//! per tick"): the per-tick orchestration tying the Reconciler, Dispatcher,
//! Supervisor, Outcome Handling, Review Follow-up Engine, and Idle
//! Scheduler together. `agent-runner-cli`'s `tick()` is a thin wrapper
//! around [`run_tick`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use agent_runner_store::Store;
use agent_runner_types::{
    ActivityKind, ActivityRecord, IdleHistory, ItemId, Label, ManagedPrEntry,
    ReviewFollowupLabelState, ReviewQueueEntry, ReviewReason, RepoRef, RunningIssueRecord,
    ScheduledRetryRecord, SessionRecord, WebhookQueueEntry, WebhookQueueReason, WorkItem,
};

use crate::commands::AgentCommand;
use crate::config::{AgentCommandConfig, RunnerConfig};
use crate::dispatcher::{self, with_git_cache_lock, with_repo_lock, DispatchCandidate, SlotPool};
use crate::github;
use crate::outcome::{self, PostAction};
use crate::platform::Client;
use crate::review;
use crate::supervisor::{self, PromptMode, SupervisorRequest};
use crate::templating::{render_idle_prompt, render_item_prompt};

const DEFAULT_SUPERVISOR_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);
const DEFAULT_PROVIDER: &str = "codex";

fn default_quota_backoff() -> chrono::Duration {
    chrono::Duration::minutes(30)
}

/// What a merged [`DispatchCandidate`] actually dispatches to, carried
/// alongside the candidate since `DispatchCandidate` itself only knows
/// repo/item_id/provider (spec.md §5's ordering-only merge shape).
enum DispatchContext {
    Item {
        item: WorkItem,
    },
    Idle {
        repo: String,
        task: String,
    },
    ReviewFollowup {
        number: u64,
        reason: ReviewReason,
    },
}

/// Runs one full tick of the dispatch algorithm (spec.md §4.5 steps 1-9).
pub async fn run_tick(config: &RunnerConfig, store: &Store, client: &dyn Client, slots: &SlotPool) -> Result<()> {
    let now = Utc::now();
    let exclude: HashSet<String> = HashSet::new();
    let repo_names = crate::reconciler::resolve_in_scope_repos(config, store, client, &exclude).await?;
    let repos: Vec<RepoRef> = repo_names.iter().map(|n| RepoRef::new(&config.owner, n)).collect();

    let mut item_map: HashMap<ItemId, WorkItem> = HashMap::new();
    for repo in &repos {
        if let Err(err) = promote_request_labels(config, client, repo).await {
            tracing::warn!(repo = %repo, error = %err, "request-label promotion failed");
        }
        if let Err(err) = collect_queued_items(config, store, client, repo, &mut item_map).await {
            tracing::warn!(repo = %repo, error = %err, "queued-item scan failed");
        }
        if let Err(err) = harvest_failed_item_retries(config, store, client, repo).await {
            tracing::warn!(repo = %repo, error = %err, "failed-item retry harvest failed");
        }
    }

    if let Err(err) = detect_and_recover_stalled(config, store, client, &repos, now).await {
        tracing::warn!(error = %err, "stalled-state recovery failed");
    }

    let mut claimed: HashSet<ItemId> = HashSet::new();
    let mut contexts: HashMap<ItemId, DispatchContext> = HashMap::new();

    let scheduled_retry_tier = collect_scheduled_retry_tier(config, &item_map, &mut claimed, &mut contexts, now)?;

    let webhook_entries = store.drain_webhook_queue().unwrap_or_default();
    let (stalled_tier, webhook_tier) = build_webhook_tiers(webhook_entries, &item_map, &mut claimed, &mut contexts);

    let reconciler_tier = collect_reconciler_tier(config, &item_map, &claimed, &mut contexts);
    for candidate in &reconciler_tier {
        claimed.insert(candidate.item_id.clone());
    }

    let mut idle_history = store.load_idle_history().unwrap_or_default();
    let idle_tier = collect_idle_tier(config, &repo_names, &mut idle_history, now, &mut contexts);
    store.save_idle_history(&idle_history).ok();

    let claimed_count =
        stalled_tier.len() + scheduled_retry_tier.len() + webhook_tier.len() + reconciler_tier.len() + idle_tier.len();
    let review_followup_tier = run_review_followup_scan(config, store, client, claimed_count, &mut contexts).await?;

    let merged = dispatcher::merge_by_priority(
        stalled_tier,
        scheduled_retry_tier,
        webhook_tier,
        reconciler_tier,
        idle_tier,
        review_followup_tier,
    );

    let state_dir = config.state_dir();
    for candidate in merged {
        let Some(guard) = slots.try_acquire(&candidate.provider) else {
            tracing::debug!(provider = %candidate.provider, item_id = %candidate.item_id, "no slot available this tick");
            continue;
        };
        let Some(context) = contexts.remove(&candidate.item_id) else {
            continue;
        };
        let repo = candidate.repo.clone();
        let provider = candidate.provider.clone();
        let result =
            run_one_under_locks(config, store, client, &state_dir, repo.clone(), provider, context, now).await;
        drop(guard);
        if let Err(err) = result {
            tracing::error!(repo = %repo, item_id = %candidate.item_id, error = %err, "dispatch failed");
        }
    }

    Ok(())
}

/// Step 4: promotes `request`-labeled, non-terminal items to `queued`
/// without fetching comments (spec.md §4.4 step 1).
async fn promote_request_labels(config: &RunnerConfig, client: &dyn Client, repo: &RepoRef) -> Result<()> {
    let raw_items = client.list_labeled_items(&repo.owner, &repo.name, "request").await?;
    for raw in raw_items {
        let Some(item) = github::parse_work_item(repo.clone(), &raw, &config.labels, &[]) else {
            continue;
        };
        if crate::reconciler::needs_queued_label(&item) {
            client
                .add_labels(&repo.owner, &repo.name, item.number, &[github::label_name(&config.labels, Label::Queued)])
                .await?;
        }
    }
    Ok(())
}

/// Step 3: lists `queued`-labeled items (with comments, so inline `/agent`
/// commands can be harvested) and builds the per-tick item map the
/// remaining tiers select candidates from.
async fn collect_queued_items(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
    item_map: &mut HashMap<ItemId, WorkItem>,
) -> Result<()> {
    let raw_items = client
        .list_labeled_items(&repo.owner, &repo.name, &config.labels.queued)
        .await?;
    for raw in raw_items {
        let Some(number) = raw.get("number").and_then(Value::as_u64) else {
            continue;
        };
        let comments_raw = client
            .list_comments(&repo.owner, &repo.name, number)
            .await
            .unwrap_or_default();
        let Some(item) = github::parse_work_item(repo.clone(), &raw, &config.labels, &comments_raw) else {
            continue;
        };

        for command in crate::reconciler::harvest_commands(&item, store)? {
            if let Err(err) = apply_inline_command(config, store, client, &item, command).await {
                tracing::warn!(repo = %repo, number = item.number, error = %err, "inline command application failed");
            }
        }

        item_map.insert(item.id.clone(), item);
    }
    Ok(())
}

/// `/agent retry` matters most for items already labeled `failed` (mutually
/// exclusive with `queued` per I1), which the queued-only scan above never
/// sees — so failed items get their own, narrower comment scan.
async fn harvest_failed_item_retries(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
) -> Result<()> {
    let raw_items = client
        .list_labeled_items(&repo.owner, &repo.name, &config.labels.failed)
        .await?;
    for raw in raw_items {
        let Some(number) = raw.get("number").and_then(Value::as_u64) else {
            continue;
        };
        let comments_raw = client
            .list_comments(&repo.owner, &repo.name, number)
            .await
            .unwrap_or_default();
        let Some(item) = github::parse_work_item(repo.clone(), &raw, &config.labels, &comments_raw) else {
            continue;
        };
        for command in crate::reconciler::harvest_commands(&item, store)? {
            if command == AgentCommand::Retry {
                apply_inline_command(config, store, client, &item, command).await.ok();
            }
        }
    }
    Ok(())
}

async fn apply_inline_command(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    item: &WorkItem,
    command: AgentCommand,
) -> Result<()> {
    match command {
        AgentCommand::Run => Ok(()),
        AgentCommand::Retry => {
            if item.has_label(Label::Failed) {
                client
                    .remove_label(&item.repo.owner, &item.repo.name, item.number, &github::label_name(&config.labels, Label::Failed))
                    .await?;
                client
                    .add_labels(&item.repo.owner, &item.repo.name, item.number, &[github::label_name(&config.labels, Label::Queued)])
                    .await?;
            }
            Ok(())
        }
        AgentCommand::Reset => {
            let mut sessions = store.load_sessions()?;
            if sessions.remove(&item.id).is_some() {
                store.save_sessions(&sessions)?;
            }
            Ok(())
        }
        AgentCommand::Stop => {
            if item.has_label(Label::Queued) && !item.has_label(Label::Running) {
                client
                    .remove_label(&item.repo.owner, &item.repo.name, item.number, &github::label_name(&config.labels, Label::Queued))
                    .await?;
            }
            Ok(())
        }
    }
}

/// Steps 1-2: detects stalled items (a dead-PID Activity record, or a
/// `running`-labeled item with no matching Activity record at all) and
/// recovers each one.
async fn detect_and_recover_stalled(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repos: &[RepoRef],
    now: DateTime<Utc>,
) -> Result<()> {
    let activity = store.load_activity().unwrap_or_default();
    let dead = dispatcher::find_stalled(&activity);
    let dead_ids: HashSet<String> = dead.iter().map(|a| a.id.clone()).collect();

    let active_issue_ids: HashSet<&str> = activity
        .iter()
        .filter(|a| a.kind == ActivityKind::Issue && !dead_ids.contains(&a.id))
        .filter_map(|a| a.item_id.as_deref())
        .collect();

    let mut to_recover: Vec<(RepoRef, u64, ItemId)> = dead
        .iter()
        .filter(|a| a.kind == ActivityKind::Issue)
        .filter_map(|a| Some((a.repo.clone(), a.item_number?, a.item_id.clone()?)))
        .collect();

    for repo in repos {
        let raw_running = client
            .list_labeled_items(&repo.owner, &repo.name, &config.labels.running)
            .await
            .unwrap_or_default();
        for raw in raw_running {
            let (Some(number), Some(id)) = (raw.get("number").and_then(Value::as_u64), raw.get("id").map(Value::to_string)) else {
                continue;
            };
            let already_tracked = active_issue_ids.contains(id.as_str()) || to_recover.iter().any(|(_, _, existing)| *existing == id);
            if !already_tracked {
                to_recover.push((repo.clone(), number, id));
            }
        }
    }

    for (repo, number, item_id) in &to_recover {
        if let Err(err) = recover_stalled_item(config, store, client, repo, *number, item_id, now).await {
            tracing::warn!(repo = %repo, number, error = %err, "stalled-item recovery failed");
        }
    }

    if dead_ids.is_empty() && to_recover.is_empty() {
        return Ok(());
    }

    let mut remaining = store.load_activity().unwrap_or_default();
    remaining.retain(|a| !dead_ids.contains(&a.id));
    store.save_activity(&remaining)?;

    let state_dir = config.state_dir();
    let recovered_ids: HashSet<&str> = to_recover.iter().map(|(_, _, id)| id.as_str()).collect();

    let mut running = agent_runner_store::running_issues::load(&state_dir).unwrap_or_default();
    for id in &recovered_ids {
        agent_runner_store::running_issues::remove(&mut running, id);
    }
    agent_runner_store::running_issues::save(&state_dir, &running)?;

    let mut retries = agent_runner_store::scheduled_retries::load(&state_dir).unwrap_or_default();
    retries.retain(|r| !recovered_ids.contains(r.item_id.as_str()));
    agent_runner_store::scheduled_retries::save(&state_dir, &retries)?;

    Ok(())
}

async fn recover_stalled_item(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
    number: u64,
    item_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    for label in [Label::Running, Label::Failed, Label::NeedsUserReply] {
        client
            .remove_label(&repo.owner, &repo.name, number, &github::label_name(&config.labels, label))
            .await
            .ok();
    }
    client
        .add_labels(&repo.owner, &repo.name, number, &[github::label_name(&config.labels, Label::Queued)])
        .await?;
    client
        .post_comment(
            &repo.owner,
            &repo.name,
            number,
            "Recovered a stalled run (the supervising process was no longer alive) and re-queued this item.",
        )
        .await?;

    store.push_webhook_queue_entry(WebhookQueueEntry {
        item_id: item_id.to_string(),
        repo: repo.clone(),
        number,
        reason: WebhookQueueReason::StalledRecovery,
        enqueued_at: now,
    })
}

fn collect_scheduled_retry_tier(
    config: &RunnerConfig,
    item_map: &HashMap<ItemId, WorkItem>,
    claimed: &mut HashSet<ItemId>,
    contexts: &mut HashMap<ItemId, DispatchContext>,
    now: DateTime<Utc>,
) -> Result<Vec<DispatchCandidate>> {
    let state_dir = config.state_dir();
    let records = agent_runner_store::scheduled_retries::load(&state_dir)?;
    let (due, not_due) = agent_runner_store::scheduled_retries::partition_due(records, now);
    agent_runner_store::scheduled_retries::save(&state_dir, &not_due)?;

    let mut tier = Vec::new();
    for record in due {
        let Some(item) = item_map.get(&record.item_id) else {
            continue;
        };
        if claimed.contains(&record.item_id) {
            continue;
        }
        claimed.insert(record.item_id.clone());
        contexts.insert(record.item_id.clone(), DispatchContext::Item { item: item.clone() });
        tier.push(DispatchCandidate {
            repo: item.repo.clone(),
            item_id: record.item_id,
            provider: DEFAULT_PROVIDER.to_string(),
        });
    }
    Ok(tier)
}

fn build_webhook_tiers(
    entries: Vec<WebhookQueueEntry>,
    item_map: &HashMap<ItemId, WorkItem>,
    claimed: &mut HashSet<ItemId>,
    contexts: &mut HashMap<ItemId, DispatchContext>,
) -> (Vec<DispatchCandidate>, Vec<DispatchCandidate>) {
    let mut stalled = Vec::new();
    let mut webhook = Vec::new();
    for entry in entries {
        let Some(item) = item_map.get(&entry.item_id) else {
            continue;
        };
        if claimed.contains(&entry.item_id) {
            continue;
        }
        claimed.insert(entry.item_id.clone());
        contexts.insert(entry.item_id.clone(), DispatchContext::Item { item: item.clone() });
        let candidate = DispatchCandidate {
            repo: entry.repo,
            item_id: entry.item_id,
            provider: DEFAULT_PROVIDER.to_string(),
        };
        match entry.reason {
            WebhookQueueReason::StalledRecovery => stalled.push(candidate),
            WebhookQueueReason::Webhook => webhook.push(candidate),
        }
    }
    (stalled, webhook)
}

fn collect_reconciler_tier(
    config: &RunnerConfig,
    item_map: &HashMap<ItemId, WorkItem>,
    claimed: &HashSet<ItemId>,
    contexts: &mut HashMap<ItemId, DispatchContext>,
) -> Vec<DispatchCandidate> {
    let eligible: Vec<WorkItem> = item_map
        .values()
        .filter(|item| !claimed.contains(&item.id))
        .cloned()
        .collect();
    let picked = crate::reconciler::select_dispatch_candidates(&eligible, config.concurrency);

    picked
        .into_iter()
        .map(|item| {
            contexts.insert(item.id.clone(), DispatchContext::Item { item: item.clone() });
            DispatchCandidate {
                repo: item.repo.clone(),
                item_id: item.id.clone(),
                provider: DEFAULT_PROVIDER.to_string(),
            }
        })
        .collect()
}

fn collect_idle_tier(
    config: &RunnerConfig,
    repo_names: &[String],
    history: &mut IdleHistory,
    now: DateTime<Utc>,
    contexts: &mut HashMap<ItemId, DispatchContext>,
) -> Vec<DispatchCandidate> {
    let scope: Vec<String> = if config.idle.repo_scope.is_empty() {
        repo_names.to_vec()
    } else {
        config.idle.repo_scope.clone()
    };
    let candidates = crate::idle::select_idle_candidates(&config.idle, &scope, history, now);

    candidates
        .into_iter()
        .map(|candidate| {
            crate::idle::record_idle_run(history, &candidate.repo, &candidate.task, now);
            let item_id = ActivityRecord::idle_id(&format!("{}:{}", candidate.repo, candidate.task));
            contexts.insert(
                item_id.clone(),
                DispatchContext::Idle {
                    repo: candidate.repo.clone(),
                    task: candidate.task.clone(),
                },
            );
            DispatchCandidate {
                repo: RepoRef::new(&config.owner, &candidate.repo),
                item_id,
                provider: DEFAULT_PROVIDER.to_string(),
            }
        })
        .collect()
}

/// Step 6/8: scans the Managed-PR Set, classifies each candidate, acts on
/// approvals inline (merge-only, never queued), and upserts the rest into
/// the Review Queue; then takes up to `spare` engine-requiring entries as
/// this tick's review-followup dispatch tier (spec.md §4.6 "Scheduling").
async fn run_review_followup_scan(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    claimed_count: usize,
    contexts: &mut HashMap<ItemId, DispatchContext>,
) -> Result<Vec<DispatchCandidate>> {
    let managed = store.load_managed_prs().unwrap_or_default();
    let candidates = managed.most_recent(100);

    for entry in &candidates {
        if let Err(err) = classify_and_act_on_pr(config, store, client, entry).await {
            tracing::warn!(repo = %entry.repo, number = entry.number, error = %err, "review follow-up classification failed");
        }
    }

    let spare = config.concurrency.saturating_sub(claimed_count);
    if spare == 0 {
        return Ok(Vec::new());
    }

    let state_dir = config.state_dir();
    let mut tier = Vec::new();
    for _ in 0..spare {
        let popped = agent_runner_store::review_queue::take_first(&state_dir, |e| e.requires_engine)?;
        let Some(entry) = popped else {
            break;
        };
        contexts.insert(
            entry.item_id.clone(),
            DispatchContext::ReviewFollowup {
                number: entry.pr_number,
                reason: entry.reason,
            },
        );
        tier.push(DispatchCandidate {
            repo: entry.repo,
            item_id: entry.item_id,
            provider: DEFAULT_PROVIDER.to_string(),
        });
    }
    Ok(tier)
}

async fn classify_and_act_on_pr(config: &RunnerConfig, store: &Store, client: &dyn Client, entry: &ManagedPrEntry) -> Result<()> {
    let pr = client.get_pull_request(&entry.repo.owner, &entry.repo.name, entry.number).await?;
    let state = pr.get("state").and_then(Value::as_str).unwrap_or("open");
    let merged = pr.get("merged").and_then(Value::as_bool).unwrap_or(false);
    if state != "open" || merged {
        return Ok(());
    }
    let is_draft = pr.get("draft").and_then(Value::as_bool).unwrap_or(false);

    let threads = client
        .list_review_threads(&entry.repo.owner, &entry.repo.name, entry.number)
        .await
        .unwrap_or_default();
    let unresolved = threads
        .iter()
        .any(|t| !t.get("resolved").and_then(Value::as_bool).unwrap_or(false));

    let reviews = client
        .list_reviews(&entry.repo.owner, &entry.repo.name, entry.number)
        .await
        .unwrap_or_default();
    let requested_reviewers: Vec<String> = pr
        .get("requested_reviewers")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r.get("login").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let classification = review::classify_candidate(unresolved, &reviews, &requested_reviewers);
    let item_id: ItemId = pr
        .get("id")
        .map(Value::to_string)
        .unwrap_or_else(|| format!("{}#{}", entry.repo, entry.number));
    let current_labels = github::labels_from_json(&pr, &config.labels);
    let url = pr.get("html_url").and_then(Value::as_str).unwrap_or_default().to_string();

    match classification {
        review::Classification::ReviewComment | review::Classification::Review => {
            let reason = if classification == review::Classification::ReviewComment {
                ReviewReason::ReviewComment
            } else {
                ReviewReason::Review
            };
            let (to_add, to_remove) = review::label_diff(&current_labels, ReviewFollowupLabelState::Queued);
            mutate_labels(client, &entry.repo, entry.number, config, &to_remove, &to_add).await?;
            store.upsert_review_queue_entry(ReviewQueueEntry {
                item_id,
                pr_number: entry.number,
                repo: entry.repo.clone(),
                url,
                reason,
                requires_engine: true,
                enqueued_at: Utc::now(),
            })?;
        }
        review::Classification::Approval => {
            match review::gate(is_draft, unresolved, &requested_reviewers, &reviews) {
                review::AutoMergeStep::Merge => {
                    let (to_add, to_remove) = review::label_diff(&current_labels, ReviewFollowupLabelState::None);
                    mutate_labels(client, &entry.repo, entry.number, config, &to_remove, &to_add).await?;
                    let allowed: Vec<&str> = pr
                        .get("allowed_merge_methods")
                        .and_then(Value::as_array)
                        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_else(|| vec!["squash", "merge", "rebase"]);
                    if let review::AutoMergeStep::ActionRequired { reason } =
                        review::run_merge_sequence(client, &entry.repo.owner, &entry.repo.name, entry.number, &allowed).await?
                    {
                        let (to_add, to_remove) = review::label_diff(&current_labels, ReviewFollowupLabelState::ActionRequired);
                        mutate_labels(client, &entry.repo, entry.number, config, &to_remove, &to_add).await?;
                        client
                            .post_comment(
                                &entry.repo.owner,
                                &entry.repo.name,
                                entry.number,
                                &format!("Auto-merge needs attention: {reason}"),
                            )
                            .await
                            .ok();
                    }
                }
                review::AutoMergeStep::ActionRequired { reason } => {
                    let (to_add, to_remove) = review::label_diff(&current_labels, ReviewFollowupLabelState::ActionRequired);
                    mutate_labels(client, &entry.repo, entry.number, config, &to_remove, &to_add).await?;
                    client
                        .post_comment(
                            &entry.repo.owner,
                            &entry.repo.name,
                            entry.number,
                            &format!("Auto-merge needs attention: {reason}"),
                        )
                        .await
                        .ok();
                }
                review::AutoMergeStep::RetryLater { .. } | review::AutoMergeStep::Done => {}
            }
        }
        review::Classification::NoAction => {
            let (to_add, to_remove) = review::label_diff(&current_labels, ReviewFollowupLabelState::Waiting);
            mutate_labels(client, &entry.repo, entry.number, config, &to_remove, &to_add).await?;
        }
    }
    Ok(())
}

async fn mutate_labels(
    client: &dyn Client,
    repo: &RepoRef,
    number: u64,
    config: &RunnerConfig,
    remove: &[Label],
    add: &[Label],
) -> Result<()> {
    for label in remove {
        client
            .remove_label(&repo.owner, &repo.name, number, &github::label_name(&config.labels, *label))
            .await
            .ok();
    }
    if !add.is_empty() {
        let names: Vec<String> = add.iter().map(|l| github::label_name(&config.labels, *l)).collect();
        client.add_labels(&repo.owner, &repo.name, number, &names).await?;
    }
    Ok(())
}

fn resolve_command_config<'a>(config: &'a RunnerConfig, provider: &str) -> Option<&'a AgentCommandConfig> {
    match provider {
        "codex" => Some(&config.codex),
        "copilot" => config.copilot.as_ref(),
        "gemini" => config.gemini.as_ref(),
        "amazon_q" => config.amazon_q.as_ref(),
        _ => None,
    }
}

async fn load_prompt_template(config: &RunnerConfig, relative_path: &str) -> Result<String> {
    let path = config.workdir_root.join(relative_path);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading prompt template {}", path.display()))
}

fn existing_session_token(store: &Store, item_id: &str) -> Option<String> {
    store.load_sessions().ok()?.get(item_id).map(|s| s.session_token.clone())
}

fn persist_session(store: &Store, item_id: &str, token: Option<String>, now: DateTime<Utc>) -> Result<()> {
    let Some(token) = token else {
        return Ok(());
    };
    let mut sessions = store.load_sessions()?;
    let updated = match sessions.get(item_id) {
        Some(existing) => existing.with_update(token, now),
        None => SessionRecord {
            item_id: item_id.to_string(),
            session_token: token,
            updated_at: now,
        },
    };
    sessions.insert(item_id.to_string(), updated);
    store.save_sessions(&sessions)
}

fn push_activity(store: &Store, record: ActivityRecord) -> Result<()> {
    let mut records = store.load_activity()?;
    records.push(record);
    store.save_activity(&records)
}

fn remove_activity(store: &Store, id: &str) -> Result<()> {
    let mut records = store.load_activity()?;
    records.retain(|r| r.id != id);
    store.save_activity(&records)
}

fn push_running_issue(config: &RunnerConfig, record: RunningIssueRecord) -> Result<()> {
    let state_dir = config.state_dir();
    let mut records = agent_runner_store::running_issues::load(&state_dir)?;
    records.push(record);
    agent_runner_store::running_issues::save(&state_dir, &records)
}

fn remove_running_issue(config: &RunnerConfig, item_id: &str) -> Result<()> {
    let state_dir = config.state_dir();
    let mut records = agent_runner_store::running_issues::load(&state_dir)?;
    agent_runner_store::running_issues::remove(&mut records, item_id);
    agent_runner_store::running_issues::save(&state_dir, &records)
}

/// Best-effort git-cache refresh, called while holding the git-cache lock
/// (spec.md §4.1). A missing or stale cache is non-fatal: the Supervisor
/// runs against the working tree under `workdir_root`, not the cache
/// directly, so a failed refresh just means the next clone/fetch into the
/// working tree does more work.
async fn sync_repo_cache(config: &RunnerConfig, repo: &RepoRef) -> Result<()> {
    let cache_dir = config.state_dir().join("git-cache").join(repo.lock_key());
    if cache_dir.join(".git").is_dir() || cache_dir.is_file() {
        run_git(&cache_dir, &["fetch", "--quiet", "origin"]).await.ok();
    }
    Ok(())
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let status = tokio::process::Command::new("git").args(args).current_dir(cwd).status().await?;
    if !status.success() {
        anyhow::bail!("git {:?} exited with {status}", args);
    }
    Ok(())
}

async fn run_one(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
    provider: &str,
    context: DispatchContext,
    now: DateTime<Utc>,
) -> Result<()> {
    match context {
        DispatchContext::Item { item } => run_item(config, store, client, repo, provider, item, now).await,
        DispatchContext::Idle { repo: repo_name, task } => run_idle(config, store, repo, provider, &repo_name, &task, now).await,
        DispatchContext::ReviewFollowup { number, reason } => {
            run_review_followup(config, store, client, repo, provider, number, reason, now).await
        }
    }
}

/// Acquires the per-repo lock, then the git-cache lock nested inside it
/// (spec.md §6's lock ordering: repo lock before git-cache lock), syncs the
/// repo cache, and runs the candidate.
async fn run_one_under_locks(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    state_dir: &Path,
    repo: RepoRef,
    provider: String,
    context: DispatchContext,
    now: DateTime<Utc>,
) -> Result<()> {
    let lock_repo = repo.clone();
    with_repo_lock(state_dir, &lock_repo, move || async move {
        let cache_repo = repo.clone();
        let cache_repo_for_sync = cache_repo.clone();
        with_git_cache_lock(state_dir, &cache_repo, move || async move {
            sync_repo_cache(config, &cache_repo_for_sync).await
        })
        .await?;
        run_one(config, store, client, &repo, &provider, context, now).await
    })
    .await
}

/// Step 9 for a normal issue/PR candidate: mark running, spawn, apply the
/// Outcome Handling decision, and persist the session token (spec.md §4.7).
async fn run_item(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
    provider: &str,
    item: WorkItem,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(command_config) = resolve_command_config(config, provider) else {
        anyhow::bail!("no command configured for provider {provider}");
    };

    client
        .remove_label(&repo.owner, &repo.name, item.number, &github::label_name(&config.labels, Label::Queued))
        .await
        .ok();
    client
        .add_labels(&repo.owner, &repo.name, item.number, &[github::label_name(&config.labels, Label::Running)])
        .await?;

    let activity_id = ActivityRecord::issue_id(&item.id);
    let log_path = config.log_dir().join(format!("repo-issue-{}-{}.log", repo.lock_key(), item.number));
    push_activity(
        store,
        ActivityRecord {
            id: activity_id.clone(),
            kind: ActivityKind::Issue,
            engine: provider.to_string(),
            repo: repo.clone(),
            started_at: now,
            pid: 0,
            log_path: log_path.display().to_string(),
            item_id: Some(item.id.clone()),
            item_number: Some(item.number),
            idle_task: None,
        },
    )?;
    push_running_issue(
        config,
        RunningIssueRecord {
            item_id: item.id.clone(),
            item_number: item.number,
            repo: repo.clone(),
            pid: 0,
            started_at: now,
        },
    )?;

    let mut env_overlay = HashMap::new();
    if let Some(token) = existing_session_token(store, &item.id) {
        env_overlay.insert("AGENT_RUNNER_RESUME_SESSION".to_string(), token);
    }

    let template = load_prompt_template(config, &command_config.prompt_template).await?;
    let prompt = render_item_prompt(&template, &item);

    let request = SupervisorRequest {
        command: command_config.command.clone(),
        args: command_config.args.clone(),
        cwd: config.workdir_root.join(&repo.name),
        env_overlay,
        prompt,
        prompt_mode: PromptMode::Stdin,
        timeout: DEFAULT_SUPERVISOR_TIMEOUT,
        grace_period: DEFAULT_GRACE_PERIOD,
        log_path,
    };

    let run_result = supervisor::run(request).await;

    remove_activity(store, &activity_id)?;
    remove_running_issue(config, &item.id)?;

    let run_outcome = run_result?;
    persist_session(store, &item.id, run_outcome.session_token.clone(), now)?;

    let decision = outcome::decide(&run_outcome);
    mutate_labels(client, repo, item.number, config, &decision.transition.remove, &decision.transition.add).await?;
    apply_post_action(client, repo, item.number, &decision.post).await?;

    if decision.schedule_retry {
        let run_after_ts = run_outcome.quota_resume_at.unwrap_or_else(|| now + default_quota_backoff());
        let state_dir = config.state_dir();
        let mut retries = agent_runner_store::scheduled_retries::load(&state_dir)?;
        agent_runner_store::scheduled_retries::upsert(
            &mut retries,
            ScheduledRetryRecord {
                item_id: item.id.clone(),
                run_after_ts,
                reason: "quota".to_string(),
                session_token: run_outcome.session_token,
            },
        );
        agent_runner_store::scheduled_retries::save(&state_dir, &retries)?;
    }

    Ok(())
}

async fn apply_post_action(client: &dyn Client, repo: &RepoRef, number: u64, action: &PostAction) -> Result<()> {
    let body = match action {
        PostAction::CompletionComment { summary } => summary.clone().unwrap_or_else(|| "Done.".to_string()),
        PostAction::MarkerComment { body } => body.clone(),
        PostAction::FailureMarkerComment { reason } => format!("Run failed: {reason}"),
        PostAction::None => return Ok(()),
    };
    client.post_comment(&repo.owner, &repo.name, number, &body).await?;
    Ok(())
}

async fn run_idle(
    config: &RunnerConfig,
    store: &Store,
    repo: &RepoRef,
    provider: &str,
    repo_name: &str,
    task: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(command_config) = resolve_command_config(config, provider) else {
        anyhow::bail!("no command configured for provider {provider}");
    };

    let activity_id = ActivityRecord::idle_id(&format!("{repo_name}:{task}"));
    let log_path = config.log_dir().join(format!("idle-{}-{task}.log", repo.lock_key()));
    push_activity(
        store,
        ActivityRecord {
            id: activity_id.clone(),
            kind: ActivityKind::Idle,
            engine: provider.to_string(),
            repo: repo.clone(),
            started_at: now,
            pid: 0,
            log_path: log_path.display().to_string(),
            item_id: None,
            item_number: None,
            idle_task: Some(task.to_string()),
        },
    )?;

    let template = load_prompt_template(config, &config.idle.prompt_template).await?;
    let prompt = render_idle_prompt(&template, repo_name, task);

    let request = SupervisorRequest {
        command: command_config.command.clone(),
        args: command_config.args.clone(),
        cwd: config.workdir_root.join(repo_name),
        env_overlay: HashMap::new(),
        prompt,
        prompt_mode: PromptMode::Stdin,
        timeout: DEFAULT_SUPERVISOR_TIMEOUT,
        grace_period: DEFAULT_GRACE_PERIOD,
        log_path,
    };

    let run_result = supervisor::run(request).await;
    remove_activity(store, &activity_id)?;
    let run_outcome = run_result?;
    if !run_outcome.success {
        tracing::warn!(repo = repo_name, task, "idle task run failed");
    }
    Ok(())
}

/// Step 9 for a review-followup candidate: the outcome never goes through
/// [`outcome::decide`] (that's the Queued/Running/Done label family; review
/// follow-ups use the separate `ReviewFollowupLabelState` family), and a
/// quota failure re-queues the entry instead of scheduling a retry.
async fn run_review_followup(
    config: &RunnerConfig,
    store: &Store,
    client: &dyn Client,
    repo: &RepoRef,
    provider: &str,
    number: u64,
    reason: ReviewReason,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(command_config) = resolve_command_config(config, provider) else {
        anyhow::bail!("no command configured for provider {provider}");
    };

    let pr = client.get_pull_request(&repo.owner, &repo.name, number).await?;
    let Some(item) = github::parse_work_item(repo.clone(), &pr, &config.labels, &[]) else {
        anyhow::bail!("could not parse pull request {repo}#{number}");
    };

    let activity_id = ActivityRecord::issue_id(&item.id);
    let log_path = config.log_dir().join(format!("repo-issue-{}-{}.log", repo.lock_key(), number));
    push_activity(
        store,
        ActivityRecord {
            id: activity_id.clone(),
            kind: ActivityKind::Issue,
            engine: provider.to_string(),
            repo: repo.clone(),
            started_at: now,
            pid: 0,
            log_path: log_path.display().to_string(),
            item_id: Some(item.id.clone()),
            item_number: Some(number),
            idle_task: None,
        },
    )?;

    let mut env_overlay = HashMap::new();
    if let Some(token) = existing_session_token(store, &item.id) {
        env_overlay.insert("AGENT_RUNNER_RESUME_SESSION".to_string(), token);
    }

    let template = load_prompt_template(config, &command_config.prompt_template).await?;
    let prompt = render_item_prompt(&template, &item);

    let request = SupervisorRequest {
        command: command_config.command.clone(),
        args: command_config.args.clone(),
        cwd: config.workdir_root.join(&repo.name),
        env_overlay,
        prompt,
        prompt_mode: PromptMode::Stdin,
        timeout: DEFAULT_SUPERVISOR_TIMEOUT,
        grace_period: DEFAULT_GRACE_PERIOD,
        log_path,
    };

    let run_result = supervisor::run(request).await;
    remove_activity(store, &activity_id)?;
    let run_outcome = run_result?;
    persist_session(store, &item.id, run_outcome.session_token.clone(), now)?;

    if run_outcome.failure_kind == Some(supervisor::FailureKind::Quota) {
        store.upsert_review_queue_entry(ReviewQueueEntry {
            item_id: item.id.clone(),
            pr_number: number,
            repo: repo.clone(),
            url: item.url.clone(),
            reason,
            requires_engine: true,
            enqueued_at: now,
        })?;
        return Ok(());
    }

    let (to_add, to_remove) = review::label_diff(&item.labels, ReviewFollowupLabelState::Waiting);
    mutate_labels(client, repo, number, config, &to_remove, &to_add).await?;

    if !run_outcome.success {
        let reason_str = run_outcome
            .failure_kind
            .as_ref()
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| "execution_error".to_string());
        client
            .post_comment(&repo.owner, &repo.name, number, &format!("Review follow-up run failed: {reason_str}"))
            .await
            .ok();
    }

    Ok(())
}
