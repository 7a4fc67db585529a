//! Subprocess Supervisor (spec.md §4.3): spawns an agent command, streams
//! its combined output through log normalization, enforces a timeout with
//! graceful-then-forceful termination, and classifies the outcome.
//!
//! Grounded on the teacher's `crates/shipper/src/process.rs::run_command_with_timeout`
//! for the overall spawn/timeout/kill shape, ported from a synchronous
//! `try_wait` poll loop to `tokio::process::Command` + `tokio::time::timeout`
//! since the orchestrator runs many of these concurrently inside one Tokio
//! runtime rather than one at a time.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub enum PromptMode {
    Stdin,
    Arg,
}

pub struct SupervisorRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env_overlay: HashMap<String, String>,
    pub prompt: String,
    pub prompt_mode: PromptMode,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Auth,
    Network,
    NeedsUserReply,
    Timeout,
    ExecutionError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Quota => "quota",
            FailureKind::Auth => "auth",
            FailureKind::Network => "network",
            FailureKind::NeedsUserReply => "needs_user_reply",
            FailureKind::Timeout => "timed_out",
            FailureKind::ExecutionError => "execution_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    NeedsUserReply,
}

#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub failure_kind: Option<FailureKind>,
    pub failure_stage: Option<String>,
    pub failure_detail: Option<String>,
    pub quota_resume_at: Option<DateTime<Utc>>,
    pub session_token: Option<String>,
    pub summary: Option<String>,
    pub status: Option<RunStatus>,
}

/// Decodes one chunk of raw subprocess output per spec.md §4.3's log
/// normalization rule: if the NUL-byte ratio is at least 0.25, the chunk is
/// treated as UTF-16LE; otherwise UTF-8 (lossily, since partial multi-byte
/// reads are possible at chunk boundaries). NUL bytes are stripped and bare
/// CR is normalized to LF while CRLF is preserved.
pub fn normalize_chunk(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let nul_count = raw.iter().filter(|&&b| b == 0).count();
    let nul_ratio = nul_count as f64 / raw.len() as f64;

    let decoded = if nul_ratio >= 0.25 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&utf16)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };

    let without_nul: String = decoded.chars().filter(|&c| c != '\0').collect();
    normalize_line_endings(&without_nul)
}

fn normalize_line_endings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                out.push('\r');
            } else {
                out.push('\n');
            }
        } else {
            out.push(c);
        }
    }
    out
}

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"AGENT_RUNNER_STATUS:\s*(done|needs_user_reply)").unwrap());
static SUMMARY_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)AGENT_RUNNER_SUMMARY_START\s*(.*?)\s*AGENT_RUNNER_SUMMARY_END").unwrap()
});
static SESSION_TOKEN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"AGENT_RUNNER_SESSION:\s*(\S+)").unwrap());
static QUOTA_RESUME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"AGENT_RUNNER_RESUME_AT:\s*(\S+)").unwrap());

/// Ordered regex families for failure classification (spec.md §4.3
/// "Failure classification"). Checked in order; the first family that
/// matches any line in the tail wins.
struct FailureFamily {
    kind: FailureKind,
    patterns: &'static [&'static str],
}

static FAILURE_FAMILIES: Lazy<Vec<FailureFamily>> = Lazy::new(|| {
    vec![
        FailureFamily {
            kind: FailureKind::Quota,
            patterns: &[
                r"(?i)rate limit",
                r"(?i)quota",
                r"\b429\b",
                r"(?i)too many requests",
                r"(?i)insufficient credits",
                r"(?i)usage limit",
                r"RetryableQuotaError",
                r"MODEL_CAPACITY_EXHAUSTED",
                r"No capacity available for model \S+",
            ],
        },
        FailureFamily {
            kind: FailureKind::Auth,
            patterns: &[
                r"(?i)unauthorized",
                r"(?i)authentication failed",
                r"(?i)invalid.{0,10}token",
                r"\b401\b",
                r"\b403\b",
            ],
        },
        FailureFamily {
            kind: FailureKind::Network,
            patterns: &[
                r"(?i)connection refused",
                r"(?i)timed out",
                r"(?i)dns",
                r"(?i)network unreachable",
                r"(?i)tls handshake",
            ],
        },
    ]
});

/// Classifies the tail of captured output. Returns `None` when no family
/// matches, meaning the caller should fall back to `execution_error`.
pub fn classify_failure(tail: &str) -> Option<FailureKind> {
    if STATUS_LINE.is_match(tail) {
        if let Some(caps) = STATUS_LINE.captures(tail) {
            if &caps[1] == "needs_user_reply" {
                return Some(FailureKind::NeedsUserReply);
            }
        }
    }
    for family in FAILURE_FAMILIES.iter() {
        for pattern in family.patterns {
            if Regex::new(pattern).unwrap().is_match(tail) {
                return Some(family.kind.clone());
            }
        }
    }
    None
}

fn parse_quota_resume_at(tail: &str) -> Option<DateTime<Utc>> {
    QUOTA_RESUME_LINE
        .captures(tail)
        .and_then(|c| c.get(1))
        .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_session_token(tail: &str) -> Option<String> {
    SESSION_TOKEN_LINE
        .captures(tail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn parse_summary(tail: &str) -> Option<String> {
    SUMMARY_BLOCK
        .captures(tail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Runs one supervised subprocess to completion (or timeout), returning
/// its classified outcome. Never panics on subprocess failure; spawn
/// failures surface as an `Err` so the caller can classify them as
/// `subprocess_spawn` per the error taxonomy.
pub async fn run(request: SupervisorRequest) -> Result<SupervisorOutcome> {
    if let Some(parent) = request.log_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }

    let mut log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&request.log_path)
        .with_context(|| format!("opening log file {}", request.log_path.display()))?;

    writeln!(
        log_file,
        "[{}] [INFO] [supervisor] spawning {} {:?}",
        Utc::now().to_rfc3339(),
        request.command,
        request.args
    )?;

    let mut command = Command::new(&request.command);
    command
        .args(&request.args)
        .current_dir(&request.cwd)
        .envs(&request.env_overlay)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning {}", request.command))?;

    if matches!(request.prompt_mode, PromptMode::Stdin) {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await.ok();
            stdin.shutdown().await.ok();
        }
    }

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let captured = std::sync::Arc::new(tokio::sync::Mutex::new(String::new()));
    let log_path_for_streams = request.log_path.clone();

    let stdout_task = spawn_stream_reader(stdout, "stdout", captured.clone(), log_path_for_streams.clone());
    let stderr_task = spawn_stream_reader(stderr, "stderr", captured.clone(), log_path_for_streams.clone());

    let wait_result = tokio::time::timeout(request.timeout, child.wait()).await;

    let (exit_code, timed_out) = match wait_result {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            terminate_gracefully_then_forcefully(&mut child, request.grace_period).await;
            (None, true)
        }
    };

    stdout_task.await.ok();
    stderr_task.await.ok();

    let tail = captured.lock().await.clone();

    if timed_out {
        return Ok(SupervisorOutcome {
            success: false,
            exit_code: None,
            log_path: request.log_path,
            failure_kind: Some(FailureKind::Timeout),
            failure_stage: Some("timeout".to_string()),
            failure_detail: Some("subprocess timed out".to_string()),
            quota_resume_at: None,
            session_token: parse_session_token(&tail),
            summary: parse_summary(&tail),
            status: None,
        });
    }

    let success = exit_code == Some(0);
    let status = STATUS_LINE.captures(&tail).map(|c| {
        if &c[1] == "done" {
            RunStatus::Done
        } else {
            RunStatus::NeedsUserReply
        }
    });

    if success {
        return Ok(SupervisorOutcome {
            success: true,
            exit_code,
            log_path: request.log_path,
            failure_kind: None,
            failure_stage: None,
            failure_detail: None,
            quota_resume_at: None,
            session_token: parse_session_token(&tail),
            summary: parse_summary(&tail),
            status,
        });
    }

    let failure_kind = classify_failure(&tail).unwrap_or(FailureKind::ExecutionError);
    let quota_resume_at = if failure_kind == FailureKind::Quota {
        parse_quota_resume_at(&tail)
    } else {
        None
    };

    Ok(SupervisorOutcome {
        success: false,
        exit_code,
        log_path: request.log_path,
        failure_stage: Some("exit".to_string()),
        failure_detail: Some(tail_excerpt(&tail)),
        failure_kind: Some(failure_kind),
        quota_resume_at,
        session_token: parse_session_token(&tail),
        summary: parse_summary(&tail),
        status,
    })
}

fn tail_excerpt(tail: &str) -> String {
    const MAX_CHARS: usize = 4_000;
    if tail.len() <= MAX_CHARS {
        tail.to_string()
    } else {
        tail[tail.len() - MAX_CHARS..].to_string()
    }
}

async fn terminate_gracefully_then_forcefully(child: &mut tokio::process::Child, grace_period: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }
    if tokio::time::timeout(grace_period, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

fn spawn_stream_reader<R>(
    reader: R,
    tag: &'static str,
    captured: std::sync::Arc<tokio::sync::Mutex<String>>,
    log_path: PathBuf,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let normalized = normalize_chunk(line.as_bytes());
            {
                let mut buf = captured.lock().await;
                buf.push_str(&normalized);
                buf.push('\n');
            }
            println!("[{tag}] {normalized}");
            if let Ok(mut f) = std::fs::OpenOptions::new().append(true).open(&log_path) {
                let _ = writeln!(f, "[{tag}] {normalized}");
            }
        }
    })
}
