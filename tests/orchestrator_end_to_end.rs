//! End-to-end orchestrator tests: these actually exec the built `stressforge`
//! binary and fork its worker tree, rather than calling into the library
//! directly, so they exercise the real fork/wait/signal paths a unit test
//! calling into the library can't.

use std::process::Command;
use std::time::Duration;

use tempfile::tempdir;

fn stressforge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stressforge"))
}

/// `--all N --with noop` reaps exactly N children, all PASSED, exit 0.
#[test]
fn all_regime_with_noop_reaps_all_instances_successfully() {
    let output = stressforge()
        .args(["--all", "3", "--with", "noop", "--timeout", "1"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("passed: 3"), "stdout:\n{stdout}");
    assert!(stdout.contains("failed: 0"), "stdout:\n{stdout}");
}

/// `--class cpu?` prints the class's members and exits 0 without running
/// anything.
#[test]
fn class_query_prints_members_and_exits_without_running() {
    let output = stressforge()
        .args(["--class", "cpu?"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|l| l == "cpu"), "stdout:\n{stdout}");
}

/// `--sequential 1 --with vm,fork` runs each to completion before the next
/// starts, and both are reported passed.
#[test]
fn sequential_regime_runs_each_stressor_in_turn() {
    let output = stressforge()
        .args(["--sequential", "1", "--with", "vm,fork", "--timeout", "1"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("passed: 2"), "stdout:\n{stdout}");
}

/// `--permute 1 --with a,b,c` runs exactly 7 subsets; here we
/// check it completes within a generous wall-clock bound and exits 0 rather
/// than asserting the exact log lines, since the regime's logging destination
/// (`tracing`, `info!`) isn't captured on stdout by default.
#[test]
fn permute_regime_completes_all_nonempty_subsets() {
    let start = std::time::Instant::now();
    let output = stressforge()
        .args(["--permute", "1", "--with", "noop,yield", "--timeout", "1"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    // 3 non-empty subsets of a 2-element pool, each bounded by the 1s timeout.
    assert!(start.elapsed() < Duration::from_secs(10), "permute regime took too long");
}

/// Selecting nothing (a class with no matching, not-excluded
/// stressor enabled) forks no workers and still reports a clean `passed: 0`.
#[test]
fn empty_selection_forks_nothing() {
    let output = stressforge()
        .args(["--all", "0", "--with", "noop", "--exclude", "noop"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

/// `--exclude` and `--class?` combine: excluding a stressor doesn't stop its
/// class from being listed by the `?` query, since the query short-circuits
/// before selection ever runs.
#[test]
fn exclude_does_not_affect_class_listing() {
    let output = stressforge()
        .args(["--exclude", "cpu", "--class", "cpu?"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|l| l == "cpu"));
}

/// `--with` without a regime selector is a `ConfigError`: nonzero exit,
/// nothing forked.
#[test]
fn with_without_regime_is_a_config_error() {
    let output = stressforge()
        .args(["--with", "cpu"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(!output.status.success());
}

/// `--yaml`/`--log-file` are opt-in, append-only sinks: a run with both set
/// appends one YAML document and one text report to otherwise-untouched
/// files, without truncating whatever was there before.
#[test]
fn yaml_and_log_file_sinks_append_without_truncating() {
    let dir = tempdir().expect("failed to create temp dir");
    let yaml_path = dir.path().join("report.yaml");
    let log_path = dir.path().join("report.log");
    std::fs::write(&yaml_path, "# pre-existing content\n").unwrap();

    let output = stressforge()
        .args(["--all", "1", "--with", "noop", "--timeout", "1"])
        .arg("--yaml")
        .arg(&yaml_path)
        .arg("--log-file")
        .arg(&log_path)
        .output()
        .expect("failed to run stressforge binary");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let yaml = std::fs::read_to_string(&yaml_path).expect("yaml file should exist");
    assert!(yaml.starts_with("# pre-existing content\n"), "append must not truncate:\n{yaml}");
    assert!(yaml.contains("metrics:"), "yaml:\n{yaml}");
    assert!(yaml.contains("stressor: noop"), "yaml:\n{yaml}");

    let log = std::fs::read_to_string(&log_path).expect("log file should exist");
    assert!(log.contains("noop"), "log:\n{log}");
}

/// `--sequential` and `--all` together are mutually exclusive regime
/// selectors and should fail fast.
#[test]
fn mutually_exclusive_regimes_is_a_config_error() {
    let output = stressforge()
        .args(["--sequential", "1", "--all", "1"])
        .output()
        .expect("failed to run stressforge binary");

    assert!(!output.status.success());
}

/// `--seed` makes `--random` picks reproducible: two runs with the same seed
/// and the same universe pick the same total instance count. Timing-derived
/// figures (bogo-ops rates, wall-clock time) legitimately differ between
/// runs, so this compares the `passed: N` summary line rather than the
/// whole report.
#[test]
fn seeded_random_selection_is_reproducible() {
    let passed_count = |stdout: &str| -> Option<u32> {
        stdout
            .lines()
            .find(|l| l.starts_with("passed:"))
            .and_then(|l| l.split(':').nth(1))
            .and_then(|n| n.trim().parse().ok())
    };

    let run = || {
        stressforge()
            .args([
                "--with", "noop,yield", "--random", "5", "--seed", "42", "--timeout", "1",
            ])
            .output()
            .expect("failed to run stressforge binary")
    };

    let first = run();
    let second = run();
    assert!(first.status.success(), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    assert!(second.status.success(), "stderr: {}", String::from_utf8_lossy(&second.stderr));

    let first_stdout = String::from_utf8_lossy(&first.stdout);
    let second_stdout = String::from_utf8_lossy(&second.stdout);
    assert_eq!(
        passed_count(&first_stdout),
        passed_count(&second_stdout),
        "same --seed should produce the same total instance count\nfirst:\n{first_stdout}\nsecond:\n{second_stdout}"
    );
}
