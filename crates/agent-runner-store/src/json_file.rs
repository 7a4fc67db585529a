//! Atomic JSON file read/write shared by every store module.
//!
//! Grounded on the teacher's `atomic_write_json` / `load_state` in
//! `crates/shipper/src/state.rs`: write to a `.tmp` sibling, `fsync`, then
//! `rename` over the real path, and fsync the parent directory afterwards
//! so the rename itself is durable. Reads tolerate an absent file (returns
//! `Ok(None)`) but propagate a parse error on a corrupt file rather than
//! silently discarding state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub(crate) fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state dir {}", parent.display()))?;
    }

    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);
    Ok(())
}

/// Read and parse `path`, returning `Ok(None)` if it does not exist.
///
/// A corrupt file is a hard error (state corruption is reported, never
/// silently treated as "absent" — spec.md's error taxonomy `StateCorruption`
/// variant is raised by the caller from this `Err`).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let value: T = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse state JSON {}", path.display()))?;
    Ok(Some(value))
}

/// Read and parse `path`, defaulting to `T::default()` if it does not exist.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    Ok(read_json(path)?.unwrap_or_default())
}

fn lock_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Run `mutate` against the record family at `path` under its sibling
/// `.lock` file (spec.md §4.1 "Per-state file short locks"), persisting
/// the result back atomically before releasing the lock. Used by the
/// writable stores a second process could race to append to: managed-PRs,
/// review queue, webhook queue.
pub fn with_locked<T, R>(path: &Path, mutate: impl FnOnce(&mut T) -> Result<R>) -> Result<R>
where
    T: DeserializeOwned + Serialize + Default,
{
    let _guard = agent_runner_lock::acquire_short_lock(&lock_sibling(path))?;
    let mut value: T = read_json_or_default(path)?;
    let result = mutate(&mut value)?;
    write_json(path, &value)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Dummy {
        value: u32,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert_eq!(read_json::<Dummy>(&path).unwrap(), None);
    }

    #[test]
    fn round_trips_through_tmp_rename() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("thing.json");
        let value = Dummy { value: 42 };
        write_json(&path, &value).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(read_json::<Dummy>(&path).unwrap(), Some(value));
    }

    #[test]
    fn corrupt_file_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thing.json");
        fs::write(&path, b"not json").unwrap();
        assert!(read_json::<Dummy>(&path).is_err());
    }

    #[test]
    fn default_fills_in_for_absent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert_eq!(read_json_or_default::<Dummy>(&path).unwrap(), Dummy::default());
    }

    #[test]
    fn with_locked_mutates_and_releases_its_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thing.json");

        let out = with_locked::<Dummy, _>(&path, |value| {
            value.value += 1;
            Ok(value.value)
        })
        .unwrap();
        assert_eq!(out, 1);
        assert!(!lock_sibling(&path).exists(), "lock must be released");
        assert_eq!(read_json::<Dummy>(&path).unwrap(), Some(Dummy { value: 1 }));
    }
}
