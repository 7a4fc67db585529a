#![no_main]

use std::fs;

use agent_runner_store::json_file;
use agent_runner_types::RepoCache;
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = td.path().join("repo-cache.json");
    if fs::write(&path, data).is_ok() {
        let _ = json_file::read_json_or_default::<RepoCache>(&path);
    }
});
