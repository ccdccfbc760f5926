//! CLI tests for the rv binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Config with short delays so commands finish quickly
const FAST_CONFIG: &str = r#"
monitor:
  print-duration-ms: 10
barrier:
  max-arrival-delay-ms: 10
  timeout-ms: 2000
channel:
  processing-delay-ms: 5
pool:
  max-task-delay-ms: 10
futures:
  max-delay-ms: 10
active:
  task-duration-ms: 10
"#;

fn rv(dir: &TempDir, config: &str) -> Command {
    let path = dir.path().join("rv.yml");
    std::fs::write(&path, config).unwrap();
    let mut cmd = Command::cargo_bin("rv").unwrap();
    cmd.current_dir(dir.path()).arg("--config").arg(&path);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("rv")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("print"))
        .stdout(predicate::str::contains("barrier"))
        .stdout(predicate::str::contains("orders"));
}

#[test]
fn test_read_prints_initial_value() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .arg("read")
        .assert()
        .success()
        .stdout(predicate::str::diff("Initial Data\n"));
}

#[test]
fn test_write_acknowledges() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["write", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Data write initiated: hello"));
}

#[test]
fn test_task_returns_result() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["task", "X"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Task X completed"));
}

#[test]
fn test_futures_prints_combined_result() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["futures", "-n", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "All tasks completed: Task 1 completed, Task 2 completed, Task 3 completed",
        ));
}

#[test]
fn test_print_reports_completed_jobs() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["print", "a", "b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Job submitted: a"))
        .stdout(predicate::str::contains("Job submitted: b"));
}

#[test]
fn test_orders_are_consumed() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["orders", "o1", "o2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Order produced: o1"))
        .stdout(predicate::str::contains("Started consuming orders"))
        .stdout(predicate::str::contains("o2"));
}

#[test]
fn test_pool_reports_stats() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["pool", "-n", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tasks submitted"))
        .stdout(predicate::str::contains("Completed: 4"));
}

#[test]
fn test_barrier_round_completes() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .arg("barrier")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tasks started"))
        .stdout(predicate::str::contains("Rounds completed: 1"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    rv(&dir, "pool:\n  workers: 0\n").arg("read").assert().failure();
}

#[test]
fn test_logs_go_to_stderr() {
    let dir = TempDir::new().unwrap();
    rv(&dir, FAST_CONFIG)
        .args(["-l", "info", "task", "Y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logging initialized").not())
        .stderr(predicate::str::contains("Logging initialized"));
}
