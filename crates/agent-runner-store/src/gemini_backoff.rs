//! `state/gemini-capacity-backoff.json` — transient no-capacity memo for
//! the multi-model provider (spec.md §4.2 "Capacity backoff").

use std::path::{Path, PathBuf};

use agent_runner_types::GeminiCapacityBackoff;
use anyhow::Result;

use crate::json_file;

pub fn path(state_dir: &Path) -> PathBuf {
    state_dir.join("gemini-capacity-backoff.json")
}

pub fn load(state_dir: &Path) -> Result<GeminiCapacityBackoff> {
    json_file::read_json_or_default(&path(state_dir))
}

pub fn save(state_dir: &Path, backoff: &GeminiCapacityBackoff) -> Result<()> {
    json_file::write_json(&path(state_dir), backoff)
}
