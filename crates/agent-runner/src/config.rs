//! `.agent-runner.toml` configuration schema and CLI-override merge.
//!
//! Generalized from the teacher's `ShipperConfig`/`CliOverrides`/
//! `build_runtime_options` shape (`crates/shipper/src/config.rs`): nested
//! `#[serde(default)]` sub-structs with hand-written `Default` impls and
//! `default_*()` helper functions, a `validate()` pass that `bail!`s on the
//! first invalid field, and a merge step where CLI-provided values win over
//! file values (`Option` fields mean "flag not passed"; `bool` fields mean
//! "explicitly enabled" and OR together with the file value).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

fn default_poll_interval() -> u64 {
    60
}

fn default_concurrency() -> usize {
    4
}

fn default_repo_cache_max_age_minutes() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    pub queued: String,
    pub running: String,
    pub done: String,
    pub failed: String,
    #[serde(rename = "needsUserReply")]
    pub needs_user_reply: String,
    #[serde(rename = "reviewFollowup")]
    pub review_followup: String,
    #[serde(rename = "actionRequired", default = "default_action_required_label")]
    pub action_required: String,
}

fn default_action_required_label() -> String {
    "action-required".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "promptTemplate")]
    pub prompt_template: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "maxRunsPerCycle", default)]
    pub max_runs_per_cycle: usize,
    #[serde(rename = "cooldownMinutes", default)]
    pub cooldown_minutes: u64,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(rename = "promptTemplate", default)]
    pub prompt_template: String,
    #[serde(rename = "repoScope", default)]
    pub repo_scope: Vec<String>,
    #[serde(rename = "usageGate", default)]
    pub usage_gate: Option<f64>,
    #[serde(rename = "copilotUsageGate", default)]
    pub copilot_usage_gate: Option<f64>,
    #[serde(rename = "geminiUsageGate", default)]
    pub gemini_usage_gate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookCatchupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "intervalMinutes", default = "default_catchup_interval")]
    pub interval_minutes: u64,
    #[serde(rename = "maxIssuesPerRun", default = "default_catchup_max_issues")]
    pub max_issues_per_run: usize,
}

fn default_catchup_interval() -> u64 {
    15
}

fn default_catchup_max_issues() -> usize {
    50
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            path: "/webhook".to_string(),
            secret: None,
            secret_env: None,
            max_payload_bytes: default_max_payload_bytes(),
            queue_file: None,
            catchup: WebhookCatchupConfig::default(),
        }
    }
}

fn default_max_payload_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_host")]
    pub host: String,
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    pub secret: Option<String>,
    #[serde(rename = "secretEnv")]
    pub secret_env: Option<String>,
    #[serde(rename = "maxPayloadBytes", default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
    #[serde(rename = "queueFile")]
    pub queue_file: Option<String>,
    #[serde(default)]
    pub catchup: WebhookCatchupConfig,
}

fn default_webhook_host() -> String {
    "127.0.0.1".to_string()
}

fn default_webhook_port() -> u16 {
    8787
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMaintenanceConfig {
    #[serde(rename = "maxAgeDays", default = "default_log_max_age_days")]
    pub max_age_days: u64,
    #[serde(rename = "keepLatest", default = "default_log_keep_latest")]
    pub keep_latest: usize,
    #[serde(rename = "maxTotalMB", default = "default_log_max_total_mb")]
    pub max_total_mb: u64,
    #[serde(rename = "taskRunKeepLatest", default = "default_log_keep_latest")]
    pub task_run_keep_latest: usize,
}

impl Default for LogMaintenanceConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_log_max_age_days(),
            keep_latest: default_log_keep_latest(),
            max_total_mb: default_log_max_total_mb(),
            task_run_keep_latest: default_log_keep_latest(),
        }
    }
}

fn default_log_max_age_days() -> u64 {
    14
}

fn default_log_keep_latest() -> usize {
    20
}

fn default_log_max_total_mb() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConcurrencyConfig {
    #[serde(default)]
    pub codex: Option<usize>,
    #[serde(default)]
    pub copilot: Option<usize>,
    #[serde(default)]
    pub gemini: Option<usize>,
    #[serde(rename = "amazonQ", default)]
    pub amazon_q: Option<usize>,
    #[serde(default)]
    pub claude: Option<usize>,
}

/// Root configuration document, matching spec.md §6's required/optional
/// field list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub owner: String,
    #[serde(rename = "workdirRoot")]
    pub workdir_root: PathBuf,
    #[serde(rename = "pollIntervalSeconds", default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub labels: LabelsConfig,
    pub codex: AgentCommandConfig,

    #[serde(default = "default_repos")]
    pub repos: ReposSelector,
    #[serde(rename = "repoCacheMaxAgeMinutes", default = "default_repo_cache_max_age_minutes")]
    pub repo_cache_max_age_minutes: u64,
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(rename = "amazonQ", default)]
    pub amazon_q: Option<AgentCommandConfig>,
    #[serde(default)]
    pub copilot: Option<AgentCommandConfig>,
    #[serde(default)]
    pub gemini: Option<AgentCommandConfig>,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(rename = "logMaintenance", default)]
    pub log_maintenance: LogMaintenanceConfig,
    #[serde(rename = "serviceConcurrency", default)]
    pub service_concurrency: ServiceConcurrencyConfig,

    /// Arbitrary extra per-repo overrides, not part of spec.md's required
    /// schema but kept for forward compatibility the way the teacher's
    /// config carries an `extra: BTreeMap<String, toml::Value>` escape
    /// hatch.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReposSelector {
    All(String),
    List(Vec<String>),
}

fn default_repos() -> ReposSelector {
    ReposSelector::All("all".to_string())
}

impl RunnerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: RunnerConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_workspace(root: &Path) -> Result<Self> {
        for name in [".agent-runner.toml", "agent-runner.toml"] {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Self::load_from_file(&candidate);
            }
        }
        bail!(
            "no configuration file found under {} (expected .agent-runner.toml)",
            root.display()
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            bail!("configuration error: `owner` must not be empty");
        }
        if self.concurrency == 0 {
            bail!("configuration error: `concurrency` must be at least 1");
        }
        if self.poll_interval_seconds == 0 {
            bail!("configuration error: `pollIntervalSeconds` must be at least 1");
        }
        if self.webhooks.secret.is_none() && self.webhooks.secret_env.is_none() {
            bail!("configuration error: `webhooks.secret` or `webhooks.secretEnv` is required");
        }
        if let Some(gate) = self.idle.usage_gate {
            if !(0.0..=1.0).contains(&gate) {
                bail!("configuration error: `idle.usageGate` must be within [0, 1]");
            }
        }
        if self.log_maintenance.max_total_mb == 0 {
            bail!("configuration error: `logMaintenance.maxTotalMB` must be at least 1");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn repo_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.repo_cache_max_age_minutes * 60)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.workdir_root.join("agent-runner").join("state")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workdir_root.join("agent-runner").join("logs")
    }

    /// Merge CLI overrides on top of the file config, building the final
    /// options a `run` invocation actually acts on. CLI values win for
    /// every `Option`; boolean flags OR together (teacher's
    /// `build_runtime_options`).
    pub fn apply_cli_overrides(mut self, cli: CliOverrides) -> Self {
        if let Some(config_path_override) = cli.workdir_root {
            self.workdir_root = config_path_override;
        }
        if let Some(concurrency) = cli.concurrency {
            self.concurrency = concurrency;
        }
        self.idle.enabled |= cli.idle_enabled;
        self
    }
}

/// Flags the CLI can pass that override file configuration. `Option` fields
/// mean "flag not passed"; `bool` fields mean "explicitly enabled" (never
/// used to force a feature off — matching the teacher's `CliOverrides`
/// convention, since `run --no-X` flags aren't part of spec.md's CLI).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub workdir_root: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub idle_enabled: bool,
    pub dry_run: bool,
    pub once: bool,
}

pub fn default_toml_template() -> String {
    r#"owner = "my-org"
workdirRoot = "/var/lib/agent-runner"
pollIntervalSeconds = 60
concurrency = 4

[labels]
queued = "agent-queued"
running = "agent-running"
done = "agent-done"
failed = "agent-failed"
needsUserReply = "agent-needs-user-reply"
reviewFollowup = "agent-review-followup"

[codex]
command = "codex"
args = ["exec"]
promptTemplate = "prompts/codex.md"

[webhooks]
host = "127.0.0.1"
port = 8787
path = "/webhook"
secretEnv = "AGENT_RUNNER_WEBHOOK_SECRET"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
owner = "my-org"
workdirRoot = "/tmp/agent-runner-workdir"

[labels]
queued = "queued"
running = "running"
done = "done"
failed = "failed"
needsUserReply = "needs-user-reply"
reviewFollowup = "review-followup"

[codex]
command = "codex"
promptTemplate = "prompt.md"

[webhooks]
secretEnv = "AGENT_RUNNER_WEBHOOK_SECRET"
"#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: RunnerConfig = toml::from_str(&minimal_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.webhooks.max_payload_bytes, 1024 * 1024);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config: RunnerConfig = toml::from_str(&minimal_toml()).unwrap();
        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_webhook_secret() {
        let toml_src = minimal_toml().replace("secretEnv = \"AGENT_RUNNER_WEBHOOK_SECRET\"", "");
        let config: RunnerConfig = toml::from_str(&toml_src).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_win_and_bools_or_together() {
        let config: RunnerConfig = toml::from_str(&minimal_toml()).unwrap();
        let overridden = config.apply_cli_overrides(CliOverrides {
            concurrency: Some(9),
            idle_enabled: true,
            ..Default::default()
        });
        assert_eq!(overridden.concurrency, 9);
        assert!(overridden.idle.enabled);
    }
}
