//! CLI tests for `benchtree run` and `benchtree inspect`

use benchtree::report::Report;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_cli_help() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_requires_subcommand() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.assert().failure();
}

#[test]
fn test_run_prints_json_report() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    let output = cmd
        .args(["run", "vector-fill", "--size", "64", "--iterations", "2"])
        .env_remove("BENCHTREE_PROFILING")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = Report::parse(&String::from_utf8(output.stdout).unwrap()).unwrap();
    assert_eq!(report.threads.len(), 1);
    let bunch = &report.threads[0].nodes[0];
    assert_eq!(bunch.name, "vector_fill");
    assert_eq!(bunch.comment("N"), Some("64"));
    assert_eq!(bunch.children_elapsed_ns(), bunch.elapsed_ns);
}

#[test]
fn test_run_with_threads() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    let output = cmd
        .args(["run", "bitset-fill", "-n", "4", "-i", "1", "--threads", "3"])
        .env_remove("BENCHTREE_PROFILING")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = Report::parse(&String::from_utf8(output.stdout).unwrap()).unwrap();
    assert_eq!(report.threads.len(), 3);
    assert!(report
        .threads
        .iter()
        .all(|t| t.nodes[0].name == "bitset_fill"));
}

#[test]
fn test_run_pretty_with_summary() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.args(["run", "vector-copy", "-n", "16", "-i", "1"])
        .args(["--format", "pretty", "--summary"])
        .env_remove("BENCHTREE_PROFILING")
        .assert()
        .success()
        .stdout(predicate::str::contains("vector_copy"))
        .stdout(predicate::str::contains("indexed_loop"))
        .stderr(predicate::str::contains("Calls"));
}

#[test]
fn test_run_zero_threads_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.args(["run", "vector-fill", "--threads", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--threads"));
}

#[test]
fn test_run_disabled_by_environment() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.args(["run", "vector-fill", "-n", "8", "-i", "1"])
        .env("BENCHTREE_PROFILING", "off")
        .assert()
        .success()
        .stdout(predicate::str::diff("{}\n"));
}

#[test]
fn test_output_file_then_inspect() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.args(["run", "vector-fill", "-n", "32", "-i", "2", "-o"])
        .arg(&path)
        .env_remove("BENCHTREE_PROFILING")
        .env("BENCHTREE_THREAD_LABELS", "1")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(Report::parse(&saved).is_ok());

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("worker-0@ThreadId("))
        .stdout(predicate::str::contains("  vector_fill  "));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.args(["inspect", "--summary"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("extend"))
        .stdout(predicate::str::contains("push"));
}

#[test]
fn test_inspect_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.json");
    std::fs::write(&path, "not json").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("benchtree");
    cmd.arg("inspect")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a timing report"));
}
