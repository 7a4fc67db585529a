//! CLI entry point. Subcommands: `run`, `status`, `labels sync`, `stop`,
//! `prune` (spec.md §6 "CLI").

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use agent_runner::config::{CliOverrides, RunnerConfig};

#[derive(Parser)]
#[command(name = "agent-runner", version, about = "Autonomous agent orchestrator")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconcile/dispatch/supervise loop.
    Run {
        /// Run a single tick then exit, instead of looping forever.
        #[arg(long)]
        once: bool,
        /// Plan actions without calling the platform or spawning subprocesses.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a status snapshot of the durable store.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Label maintenance.
    Labels {
        #[command(subcommand)]
        action: LabelsCommand,
    },
    /// Write a stop request flag for a running instance to observe.
    Stop,
    /// Prune the log directory per the configured retention policy.
    Prune,
}

#[derive(Subcommand)]
enum LabelsCommand {
    /// Ensure the configured label set exists on every in-scope repo.
    Sync {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(dispatch(cli.command, config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<RunnerConfig> {
    let config = match &cli.config {
        Some(path) => RunnerConfig::load_from_file(path)?,
        None => RunnerConfig::load_from_workspace(&std::env::current_dir()?)?,
    };
    let (once, dry_run) = match &cli.command {
        Command::Run { once, dry_run } => (*once, *dry_run),
        _ => (false, false),
    };
    let config = config.apply_cli_overrides(CliOverrides {
        workdir_root: None,
        concurrency: None,
        idle_enabled: false,
        dry_run,
        once,
    });
    config.validate().context("validating configuration")?;
    Ok(config)
}

async fn dispatch(command: Command, config: RunnerConfig) -> Result<()> {
    match command {
        Command::Run { once, dry_run } => run_loop(config, once, dry_run).await,
        Command::Status { json } => run_status(config, json).await,
        Command::Labels { action } => run_labels(config, action).await,
        Command::Stop => run_stop(config),
        Command::Prune => run_prune(config),
    }
}

async fn run_loop(config: RunnerConfig, once: bool, dry_run: bool) -> Result<()> {
    let _guard = agent_runner::observability::init_logging(&config.log_dir())
        .context("initializing logging")?;
    let store = agent_runner_store::Store::new(config.state_dir());
    let token = agent_runner::auth::resolve_github_token()?;
    let client = agent_runner::platform::HttpClient::new(token)?;
    let slots = build_slot_pool(&config);

    let _webhook_task = spawn_webhook_server(&config, &store)?;

    loop {
        tracing::info!(dry_run, "starting reconciliation tick");
        if dry_run {
            tracing::info!("dry run: skipping tick execution");
        } else if let Err(err) = tick(&config, &store, &client, &slots).await {
            tracing::error!(error = %err, "tick failed, continuing");
        }

        if let Err(err) = run_webhook_catchup_if_due(&config, &client).await {
            tracing::warn!(error = %err, "webhook catch-up scan failed");
        }

        if once {
            break;
        }
        tokio::time::sleep(config.poll_interval()).await;
    }
    Ok(())
}

/// Builds the per-tick slot pool from `concurrency` (global cap) and
/// `serviceConcurrency` (per-provider caps, falling back to the global cap
/// for any provider left unset).
fn build_slot_pool(config: &RunnerConfig) -> agent_runner::dispatcher::SlotPool {
    let mut providers = std::collections::HashMap::new();
    providers.insert(
        "codex".to_string(),
        config.service_concurrency.codex.unwrap_or(config.concurrency),
    );
    if let Some(copilot) = config.service_concurrency.copilot.or(config.copilot.as_ref().map(|_| config.concurrency)) {
        providers.insert("copilot".to_string(), copilot);
    }
    if let Some(gemini) = config.service_concurrency.gemini.or(config.gemini.as_ref().map(|_| config.concurrency)) {
        providers.insert("gemini".to_string(), gemini);
    }
    if let Some(amazon_q) = config
        .service_concurrency
        .amazon_q
        .or(config.amazon_q.as_ref().map(|_| config.concurrency))
    {
        providers.insert("amazon_q".to_string(), amazon_q);
    }
    agent_runner::dispatcher::SlotPool::new(config.concurrency, providers)
}

async fn tick(
    config: &RunnerConfig,
    store: &agent_runner_store::Store,
    client: &dyn agent_runner::platform::Client,
    slots: &agent_runner::dispatcher::SlotPool,
) -> Result<()> {
    agent_runner::pipeline::run_tick(config, store, client, slots).await
}

/// Binds the inbound webhook HTTP server and returns its background task
/// handle, if webhook ingress is configured with a resolvable secret.
fn spawn_webhook_server(
    config: &RunnerConfig,
    store: &agent_runner_store::Store,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(secret) = resolve_webhook_secret(config) else {
        tracing::info!("no webhook secret configured, webhook ingress disabled");
        return Ok(None);
    };

    let state = std::sync::Arc::new(agent_runner::webhook::WebhookState {
        secret: secret.into_bytes(),
        store: store.clone(),
        path: config.webhooks.path.clone(),
    });
    let app = agent_runner::webhook::router(state, &config.webhooks);
    let addr: std::net::SocketAddr = format!("{}:{}", config.webhooks.host, config.webhooks.port)
        .parse()
        .with_context(|| format!("invalid webhook bind address {}:{}", config.webhooks.host, config.webhooks.port))?;

    let handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, %addr, "failed to bind webhook server");
                return;
            }
        };
        tracing::info!(%addr, "webhook server listening");
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "webhook server exited");
        }
    });
    Ok(Some(handle))
}

fn resolve_webhook_secret(config: &RunnerConfig) -> Option<String> {
    if let Some(secret) = &config.webhooks.secret {
        return Some(secret.clone());
    }
    let var = config.webhooks.secret_env.as_deref()?;
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

async fn run_webhook_catchup_if_due(config: &RunnerConfig, client: &dyn agent_runner::platform::Client) -> Result<()> {
    if !config.webhooks.catchup.enabled {
        return Ok(());
    }
    let state_dir = config.state_dir();
    let now = chrono::Utc::now();
    if !agent_runner::webhook_catchup::is_due(&state_dir, config.webhooks.catchup.interval_minutes, now)? {
        return Ok(());
    }
    let enqueued = agent_runner::webhook_catchup::run_catchup(
        &state_dir,
        client,
        &config.owner,
        "request",
        config.webhooks.catchup.max_issues_per_run,
        now,
    )
    .await?;
    tracing::info!(enqueued, "webhook catch-up scan completed");
    Ok(())
}

async fn run_status(config: RunnerConfig, json: bool) -> Result<()> {
    let store = agent_runner_store::Store::new(config.state_dir());
    let snapshot = agent_runner::status::snapshot(&store, chrono::Utc::now())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("running: {}", snapshot.running_count);
        println!("managed PRs tracked: {}", snapshot.queued_managed_pr_count);
        println!("review queue depth: {}", snapshot.review_queue_depth);
        println!("webhook queue depth: {}", snapshot.webhook_queue_depth);
        println!("gemini-blocked models: {:?}", snapshot.gemini_blocked_models);
    }
    Ok(())
}

async fn run_labels(config: RunnerConfig, action: LabelsCommand) -> Result<()> {
    let LabelsCommand::Sync { yes } = action;
    if !yes {
        println!("dry run: pass --yes to actually create/update labels");
        return Ok(());
    }
    let token = agent_runner::auth::resolve_github_token()?;
    let _client = agent_runner::platform::HttpClient::new(token)?;
    println!(
        "would sync labels {:?} for owner {}",
        [
            &config.labels.queued,
            &config.labels.running,
            &config.labels.done,
            &config.labels.failed,
            &config.labels.needs_user_reply,
            &config.labels.review_followup,
        ],
        config.owner
    );
    Ok(())
}

fn run_stop(config: RunnerConfig) -> Result<()> {
    let flag_path = config.state_dir().join("stop.request.json");
    std::fs::create_dir_all(config.state_dir())?;
    std::fs::write(
        &flag_path,
        serde_json::to_vec_pretty(&serde_json::json!({ "requested_at": chrono::Utc::now() }))?,
    )?;
    println!("wrote stop request to {}", flag_path.display());
    Ok(())
}

fn run_prune(config: RunnerConfig) -> Result<()> {
    let removed = agent_runner::log_maintenance::prune(
        &config.log_dir(),
        &config.log_maintenance,
        std::time::SystemTime::now(),
    )?;
    println!("pruned {removed} log file(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_once_and_dry_run() {
        let cli = Cli::try_parse_from(["agent-runner", "run", "--once", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Run {
                once: true,
                dry_run: true
            }
        ));
    }

    #[test]
    fn cli_parses_status_json_flag() {
        let cli = Cli::try_parse_from(["agent-runner", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status { json: true }));
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["agent-runner", "bogus"]).is_err());
    }
}
