//! Log directory pruning: age, total-size, and per-class keep-latest caps
//! (spec.md §6 "Log layout"), with a `latest-<class>.path` pointer file per
//! class so callers can find the newest log without listing the directory.
//!
//! Not grounded on a specific teacher file (the teacher has no log
//! directory to maintain); shaped after the same "list, sort, trim oldest"
//! pattern as [`agent_runner_types::ManagedPrSet`]/`ProcessedCommandSet`,
//! applied to files on disk instead of in-memory records.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::config::LogMaintenanceConfig;

#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
    class: String,
    modified: SystemTime,
    bytes: u64,
}

/// Classifies a log file name into one of spec.md's three classes:
/// `task-run-*`, `repo-issue-*`, `idle-*`. Unrecognized names fall back to
/// their own name as the class, so they never pool with an unrelated class
/// during keep-latest trimming.
fn classify(file_name: &str) -> String {
    for prefix in ["task-run-", "repo-issue-", "idle-"] {
        if file_name.starts_with(prefix) {
            return prefix.trim_end_matches('-').to_string();
        }
    }
    file_name.to_string()
}

fn scan(log_dir: &Path) -> Result<Vec<LogFile>> {
    let mut files = Vec::new();
    if !log_dir.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(log_dir).with_context(|| format!("reading {}", log_dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.ends_with(".log") {
            continue;
        }
        let metadata = entry.metadata()?;
        files.push(LogFile {
            class: classify(&file_name),
            path,
            modified: metadata.modified()?,
            bytes: metadata.len(),
        });
    }
    Ok(files)
}

/// Prunes `log_dir` per `config`, then writes one `latest-<class>.path`
/// pointer file per surviving class. Returns the number of files removed.
pub fn prune(log_dir: &Path, config: &LogMaintenanceConfig, now: SystemTime) -> Result<usize> {
    let mut files = scan(log_dir)?;
    files.sort_by_key(|f| std::cmp::Reverse(f.modified));

    let max_age = std::time::Duration::from_secs(config.max_age_days * 24 * 60 * 60);
    let mut removed = 0usize;
    let mut kept: Vec<LogFile> = Vec::new();
    let mut per_class_kept: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for file in files.drain(..) {
        let age = now.duration_since(file.modified).unwrap_or_default();
        let class_count = per_class_kept.entry(file.class.clone()).or_insert(0);
        let keep_latest = if file.class == "task-run" {
            config.task_run_keep_latest
        } else {
            config.keep_latest
        };
        if age > max_age || *class_count >= keep_latest {
            fs::remove_file(&file.path)
                .with_context(|| format!("removing stale log {}", file.path.display()))?;
            removed += 1;
            continue;
        }
        *class_count += 1;
        kept.push(file);
    }

    let max_total_bytes = config.max_total_mb * 1024 * 1024;
    let mut total: u64 = kept.iter().map(|f| f.bytes).sum();
    if total > max_total_bytes {
        // `kept` is newest-first; pop from the tail (oldest survivors) to
        // respect keep-latest already established above.
        while total > max_total_bytes {
            let Some(oldest) = kept.pop() else { break };
            total = total.saturating_sub(oldest.bytes);
            fs::remove_file(&oldest.path)
                .with_context(|| format!("removing oversized-total log {}", oldest.path.display()))?;
            removed += 1;
        }
    }

    write_latest_pointers(log_dir, &kept)?;
    Ok(removed)
}

fn write_latest_pointers(log_dir: &Path, kept: &[LogFile]) -> Result<()> {
    let mut latest_by_class: std::collections::HashMap<&str, &LogFile> = std::collections::HashMap::new();
    for file in kept {
        latest_by_class
            .entry(file.class.as_str())
            .and_modify(|current| {
                if file.modified > current.modified {
                    *current = file;
                }
            })
            .or_insert(file);
    }
    for (class, file) in latest_by_class {
        let pointer = log_dir.join(format!("latest-{class}.path"));
        fs::write(&pointer, file.path.to_string_lossy().as_bytes())
            .with_context(|| format!("writing pointer {}", pointer.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_config() -> LogMaintenanceConfig {
        LogMaintenanceConfig {
            max_age_days: 14,
            keep_latest: 2,
            max_total_mb: 1,
            task_run_keep_latest: 2,
        }
    }

    #[test]
    fn keeps_only_latest_n_per_class() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("idle-{i}.log")), b"x").unwrap();
        }
        let removed = prune(dir.path(), &make_config(), SystemTime::now()).unwrap();
        assert_eq!(removed, 3);
        let remaining = scan(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn prunes_files_older_than_max_age() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("idle-old.log"), b"x").unwrap();
        let far_future = SystemTime::now() + Duration::from_secs(30 * 24 * 60 * 60);
        let removed = prune(dir.path(), &make_config(), far_future).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn writes_latest_pointer_file_per_class() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("idle-1.log"), b"x").unwrap();
        prune(dir.path(), &make_config(), SystemTime::now()).unwrap();
        assert!(dir.path().join("latest-idle.path").is_file());
    }
}
