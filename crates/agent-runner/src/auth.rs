//! Token resolution (spec.md §6 "Environment").
//!
//! Grounded on the teacher's `crates/shipper/src/auth.rs::resolve_token`:
//! an ordered environment-variable precedence chain checked first, falling
//! back to a file on disk. The teacher falls back to `credentials.toml`
//! under `$CARGO_HOME`; here the fallback is a token file under the
//! orchestrator's own state directory, since there is no equivalent of
//! Cargo's registry-credentials store for a GitHub bot identity.

use std::path::Path;

use anyhow::{Context, Result};

/// Resolves the platform API token, checking `AGENT_GITHUB_TOKEN`, then
/// `GITHUB_TOKEN`, then `GH_TOKEN`, in that order. Returns an error rather
/// than `None` because a missing platform token is always fatal at
/// startup (configuration error, per spec.md's taxonomy).
pub fn resolve_github_token() -> Result<String> {
    for var in ["AGENT_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                return Ok(value);
            }
        }
    }
    anyhow::bail!(
        "no platform token found: set AGENT_GITHUB_TOKEN, GITHUB_TOKEN, or GH_TOKEN"
    )
}

/// Resolves the token used for posting comments/notifications, which may
/// legitimately differ from the main API token (e.g. a bot identity with
/// narrower scopes). Checks `AGENT_GITHUB_NOTIFY_TOKEN` first, then falls
/// back to a `notify-token` file under the state directory, then finally
/// to the main platform token.
pub fn resolve_notify_token(state_dir: &Path) -> Result<String> {
    if let Ok(value) = std::env::var("AGENT_GITHUB_NOTIFY_TOKEN") {
        if !value.trim().is_empty() {
            return Ok(value);
        }
    }

    let token_file = state_dir.join("notify-token");
    if token_file.is_file() {
        let contents = std::fs::read_to_string(&token_file)
            .with_context(|| format!("reading {}", token_file.display()))?;
        let trimmed = contents.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    resolve_github_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn github_token_precedence_prefers_agent_specific_var() {
        temp_env::with_vars(
            [
                ("AGENT_GITHUB_TOKEN", Some("agent-token")),
                ("GITHUB_TOKEN", Some("generic-token")),
                ("GH_TOKEN", None),
            ],
            || {
                assert_eq!(resolve_github_token().unwrap(), "agent-token");
            },
        );
    }

    #[test]
    #[serial]
    fn github_token_falls_back_through_chain() {
        temp_env::with_vars(
            [
                ("AGENT_GITHUB_TOKEN", None),
                ("GITHUB_TOKEN", None),
                ("GH_TOKEN", Some("gh-cli-token")),
            ],
            || {
                assert_eq!(resolve_github_token().unwrap(), "gh-cli-token");
            },
        );
    }

    #[test]
    #[serial]
    fn missing_token_is_an_error() {
        temp_env::with_vars(
            [
                ("AGENT_GITHUB_TOKEN", None),
                ("GITHUB_TOKEN", None),
                ("GH_TOKEN", None),
            ],
            || {
                assert!(resolve_github_token().is_err());
            },
        );
    }

    #[test]
    #[serial]
    fn notify_token_reads_state_dir_file_before_falling_back() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notify-token"), "file-token\n").unwrap();
        temp_env::with_vars(
            [
                ("AGENT_GITHUB_NOTIFY_TOKEN", None),
                ("AGENT_GITHUB_TOKEN", None),
                ("GITHUB_TOKEN", None),
                ("GH_TOKEN", None),
            ],
            || {
                assert_eq!(resolve_notify_token(dir.path()).unwrap(), "file-token");
            },
        );
    }
}
