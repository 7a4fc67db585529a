//! Orchestrator core: reconciles platform state into a local task queue,
//! dispatches agent subprocesses under multi-dimensional concurrency
//! limits, interprets their outcomes, and runs the PR review follow-up and
//! idle schedulers — all under strict per-provider quota budgets.
//!
//! Module layout mirrors the pipeline spec.md §4 walks through: poll/
//! webhook intake feeds the [`reconciler`], the [`dispatcher`] acquires
//! slots and repo locks, the [`supervisor`] runs one subprocess to
//! completion, [`outcome`] turns its return value into label/comment/retry
//! decisions, and the [`review`]/[`idle`] modules consume whatever
//! capacity is left over.

/// Platform token resolution (`AGENT_GITHUB_TOKEN`/`GITHUB_TOKEN`/`GH_TOKEN`
/// and the notify-token fallback).
pub mod auth;

/// `/agent run`/`retry`/`reset`/`stop` inline-comment command parsing.
pub mod commands;

/// `.agent-runner.toml` schema, validation, and CLI-override merge.
pub mod config;

/// Dispatcher: global + per-provider slot semaphores, per-repo locking,
/// stalled-run detection, priority-tiered candidate merge.
pub mod dispatcher;

/// Error taxonomy and its retry/escalate propagation policy.
pub mod error;

/// GitHub JSON <-> domain-type translation (label names, items, comments).
pub mod github;

/// Idle Scheduler: repo/task selection under cooldown and usage gates.
pub mod idle;

/// Log directory pruning by age, total size, and per-class keep-latest.
pub mod log_maintenance;

/// `tracing`-based structured logging setup.
pub mod observability;

/// Outcome Handling: Supervisor return -> label/comment/retry decision.
pub mod outcome;

/// Per-tick dispatch orchestration: wires the reconciler, dispatcher,
/// supervisor, outcome handling, review follow-up, and idle scheduler
/// together into one `run_tick` entry point.
pub mod pipeline;

/// Platform (GitHub-style) HTTP client trait and async implementation.
pub mod platform;

/// Quota Gate: per-provider usage snapshot + ramp evaluation, warmup,
/// capacity backoff.
pub mod quota;

/// Reconciler: per-tick per-repo item scan, command harvesting, in-scope
/// repo resolution.
pub mod reconciler;

/// Review Follow-up Engine: candidate classification, label
/// materialization, auto-merge state machine.
pub mod review;

/// Status snapshot aggregation for the `status` CLI subcommand.
pub mod status;

/// Subprocess Supervisor: spawn, stream, normalize, time out, classify.
pub mod supervisor;

/// Templated body section parsing ("Repository list (if applicable)").
pub mod templating;

/// Inbound webhook HTTP server: signature verification, event routing.
pub mod webhook;

/// Periodic webhook catch-up scan for missed deliveries.
pub mod webhook_catchup;
