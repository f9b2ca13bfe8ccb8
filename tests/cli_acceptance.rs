//! CLI smoke tests over an isolated temp workspace.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use tooldeck::cache::ArtifactCache;

/// Writes a workspace config pointing every path inside the temp dir and
/// driving scripts with `sh` so no PowerShell install is needed.
fn write_config(dir: &Path) {
    fs::write(
        dir.join("tooldeck.toml"),
        r#"
[cache]
dir = "cache"
ttl = "7d"

[interpreter]
program = "sh"
args = []
version_args = ["-c", "echo shtest 1.0"]

[catalog]
# Reserved TEST-NET address: unreachable, forcing cached artifacts only
url = "http://192.0.2.1:9"
timeout = "1s"
"#,
    )
    .unwrap();
}

fn tooldeck(dir: &Path) -> Command {
    let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_tooldeck"));
    cmd.current_dir(dir);
    cmd
}

#[test]
fn doctor_reports_environment() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    tooldeck(temp.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tooldeck Doctor"))
        .stdout(predicate::str::contains("Configuration found"));
}

#[test]
fn cache_stats_clear_roundtrip() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let cache =
        ArtifactCache::open(temp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    cache.store("scripts/a.sh", b"echo a").unwrap();

    tooldeck(temp.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cached files:    1"));

    tooldeck(temp.path())
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 cached file(s)"));

    tooldeck(temp.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cached files:    0"));
}

#[test]
fn cache_sweep_reports_zero_on_fresh_cache() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let cache =
        ArtifactCache::open(temp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    cache.store("scripts/a.sh", b"echo a").unwrap();

    tooldeck(temp.path())
        .args(["cache", "sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 expired artifact(s)"));
}

#[test]
#[cfg(unix)]
fn run_executes_cached_script_and_writes_history() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let cache =
        ArtifactCache::open(temp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    cache
        .store("scripts/hello.sh", b"echo hello from the till\n")
        .unwrap();

    tooldeck(temp.path())
        .args(["run", "scripts/hello.sh", "--id", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from the till"));

    let history = fs::read_to_string(temp.path().join("history.jsonl")).unwrap();
    assert!(history.contains("\"tool_id\":\"hello\""));
    assert!(history.contains("\"success\":true"));
}

#[test]
#[cfg(unix)]
fn run_fails_on_script_error_channel() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let cache =
        ArtifactCache::open(temp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    cache
        .store("scripts/broken.sh", b"echo bad 1>&2\nexit 0\n")
        .unwrap();

    // The error channel overrides the clean exit code
    tooldeck(temp.path())
        .args(["run", "scripts/broken.sh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tool failed"));
}

#[test]
#[cfg(unix)]
fn preflight_reports_missing_script() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    tooldeck(temp.path())
        .args(["preflight", "scripts/never-fetched.sh"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("❌ script:"));
}

#[test]
#[cfg(unix)]
fn preflight_passes_on_cached_script() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path());

    let cache =
        ArtifactCache::open(temp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    cache.store("scripts/ok.sh", b"echo ok").unwrap();

    tooldeck(temp.path())
        .args(["preflight", "scripts/ok.sh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All 2 check(s) passed"));
}
