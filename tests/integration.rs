/// Integration test suite for the hot-restart binary.
///
/// All tests invoke the compiled `hot-restart` binary via subprocess. The
/// `CARGO_BIN_EXE_hot-restart` environment variable is set by Cargo during
/// `cargo test` to point to the compiled binary for the current profile.
///
/// Managed-process commands are stand-ins (`echo`, `true`, `false`, `sh -c`)
/// so the suite never depends on a PHP toolchain being installed.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hot-restart"))
}

/// Run a hot-restart command and assert it exits successfully.
/// Returns stdout as a String.
fn run_success(args: &[&str]) -> String {
    let out = Command::new(binary())
        .args(args)
        .output()
        .expect("failed to invoke hot-restart binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        out.status.success(),
        "command {:?} failed with status {:?}\nstdout: {}\nstderr: {}",
        args,
        out.status,
        stdout,
        stderr
    );
    stdout
}

/// Run a hot-restart command and assert it exits with a non-zero status.
/// Returns (stdout, stderr) as Strings.
fn run_failure(args: &[&str]) -> (String, String) {
    let out = Command::new(binary())
        .args(args)
        .output()
        .expect("failed to invoke hot-restart binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        !out.status.success(),
        "command {:?} expected to fail but exited successfully\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    (stdout, stderr)
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp path is not UTF-8")
}

/// Poll `check` until it returns true or `timeout` elapses.
fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    check()
}

fn wait_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().expect("try_wait failed") {
            return Some(status);
        }
        sleep(Duration::from_millis(50));
    }
    None
}

fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[test]
fn test_help_lists_subcommands() {
    let stdout = run_success(&["--help"]);
    for sub in ["watch", "status", "stop"] {
        assert!(stdout.contains(sub), "help missing {sub}:\n{stdout}");
    }
}

#[test]
fn test_missing_root_fails() {
    let (_, stderr) = run_failure(&["status", "/definitely/not/a/real/project/root"]);
    assert!(stderr.contains("cannot open project root"), "stderr: {stderr}");
}

#[test]
fn test_negative_heartbeat_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr) = run_failure(&["status", path_str(dir.path()), "--heartbeat=-1"]);
    assert!(stderr.contains("invalid configuration"), "stderr: {stderr}");
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

#[test]
fn test_status_counts_matching_lines() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = run_success(&[
        "status",
        path_str(dir.path()),
        "--list-cmd",
        "echo alpha-token-process",
        "--identity",
        "alpha-token-process",
    ]);
    assert!(stdout.contains("1 instance running"), "stdout: {stdout}");
}

#[test]
fn test_status_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = run_success(&[
        "status",
        path_str(dir.path()),
        "--list-cmd",
        "echo nothing-relevant-here",
        "--identity",
        "alpha-token-process",
        "--json",
    ]);
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("status --json is not JSON");
    assert_eq!(value["running"], 0);
    assert_eq!(value["identity"], "alpha-token-process");
    assert_eq!(value["list_command"], "echo nothing-relevant-here");
}

#[test]
fn test_status_fails_when_listing_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, stderr) = run_failure(&["status", path_str(dir.path()), "--list-cmd", "false"]);
    assert!(stdout.is_empty());
    assert!(stderr.contains("process listing failed"), "stderr: {stderr}");
    assert_eq!(stderr.matches("process listing failed").count(), 1, "stderr: {stderr}");
}

#[test]
fn test_status_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("hot-restart.toml"),
        r#"
identity = "beta-token-process"
list_command = ["sh", "-c", "echo beta-token-process; echo beta-token-process; echo other"]
"#,
    )
    .unwrap();

    let stdout = run_success(&["status", path_str(dir.path()), "--json"]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["running"], 2);
    assert_eq!(value["identity"], "beta-token-process");
}

#[test]
fn test_flags_override_config_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("hot-restart.toml"),
        "identity = \"from-config\"\nlist_command = \"echo from-config\"\n",
    )
    .unwrap();

    let stdout = run_success(&[
        "status",
        path_str(dir.path()),
        "--identity",
        "from-flag",
        "--json",
    ]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["identity"], "from-flag");
    assert_eq!(value["running"], 0);
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

#[test]
fn test_stop_runs_stop_command() {
    let dir = tempfile::tempdir().unwrap();
    run_success(&["stop", path_str(dir.path()), "--stop-cmd", "true"]);
}

#[test]
fn test_stop_renders_identity_into_stop_command() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("stopped.log");
    fs::write(
        dir.path().join("hot-restart.toml"),
        format!(
            "identity = \"delta-token-process\"\nstop_command = [\"sh\", \"-c\", \"echo {{identity}} > {}\"]\n",
            marker.display()
        ),
    )
    .unwrap();

    run_success(&["stop", path_str(dir.path())]);
    assert_eq!(
        fs::read_to_string(&marker).unwrap().trim(),
        "delta-token-process"
    );
}

#[test]
fn test_stop_reports_failure_once() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr) = run_failure(&["stop", path_str(dir.path()), "--stop-cmd", "false"]);
    assert_eq!(stderr.matches("error: ").count(), 1, "stderr: {stderr}");
}

// ---------------------------------------------------------------------------
// watch
// ---------------------------------------------------------------------------

/// Launch `watch` on a fresh project whose start command appends a line to
/// `starts.log` outside the watched tree, change a watched file, and stop the
/// supervisor with SIGTERM.
#[cfg(unix)]
#[test]
fn test_watch_restarts_on_change_and_exits_cleanly_on_sigterm() {
    let project = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let starts = scratch.path().join("starts.log");
    let stops = scratch.path().join("stops.log");

    fs::write(project.path().join("index.php"), "<?php\n").unwrap();
    fs::create_dir(project.path().join("storage")).unwrap();
    fs::write(
        project.path().join("hot-restart.toml"),
        format!(
            r#"
identity = "gamma-token-process"
list_command = "true"
start_command = ["sh", "-c", "echo start >> {starts}"]
stop_command = ["sh", "-c", "echo stop >> {stops}"]
heartbeat_secs = 0.2
grace_period_ms = 0
"#,
            starts = starts.display(),
            stops = stops.display(),
        ),
    )
    .unwrap();

    let mut child = Command::new(binary())
        .args(["watch", path_str(project.path())])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn hot-restart watch");

    assert!(
        wait_for(Duration::from_secs(10), || count_lines(&starts) == 1),
        "initial start never ran"
    );

    // Outside the heartbeat window; ignored directories and other extensions
    // must not count.
    sleep(Duration::from_millis(500));
    fs::write(project.path().join("storage").join("cache.php"), "<?php\n").unwrap();
    fs::write(project.path().join("notes.txt"), "hello\n").unwrap();
    sleep(Duration::from_millis(500));
    assert_eq!(count_lines(&starts), 1);

    fs::write(project.path().join("index.php"), "<?php echo 1;\n").unwrap();
    assert!(
        wait_for(Duration::from_secs(10), || count_lines(&starts) >= 2),
        "change to a watched file did not restart"
    );

    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .expect("failed to run kill");
    assert!(status.success());

    let exit = wait_exit(&mut child, Duration::from_secs(10));
    if exit.is_none() {
        let _ = child.kill();
    }
    let exit = exit.expect("hot-restart did not exit after SIGTERM");
    assert!(exit.success(), "exit status {exit:?}");
    assert!(count_lines(&stops) >= 1, "stop command did not run on shutdown");
}
