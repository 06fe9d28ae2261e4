use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

fn cadence(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cadence").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn run_demo_plan_passes_and_writes_junit() {
    let dir = tempfile::tempdir().unwrap();
    let junit = dir.path().join("out").join("junit.xml");

    cadence(dir.path())
        .arg("--config")
        .arg(demo("cadence.toml"))
        .arg("run")
        .arg(demo("smoke.toml"))
        .arg("--junit")
        .arg(&junit)
        .assert()
        .success()
        .stdout(predicate::str::contains("All tests passed!"));

    let xml = std::fs::read_to_string(junit).unwrap();
    assert!(xml.contains("tests=\"4\" failures=\"0\""));
    assert!(xml.contains("name=\"echo-roundtrip\""));
}

#[test]
fn run_failing_plan_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("failing.toml");
    std::fs::write(
        &plan,
        r#"
        [[test]]
        name = "passes"
        actions = [{ type = "echo", message = "fine" }]

        [[test]]
        name = "gives-up"

        [[test.actions]]
        type = "repeat-on-error"
        until = "false"
        max_attempts = 2
        auto_sleep_ms = 0
        actions = [{ type = "fail", message = "still down", kind = "IoError" }]
        "#,
    )
    .unwrap();

    cadence(dir.path())
        .arg("run")
        .arg(&plan)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Some tests failed."))
        .stdout(predicate::str::contains("gives-up"))
        .stdout(predicate::str::contains("IoError: still down"));

    assert!(dir.path().join("test-results").join("junit.xml").exists());
}

#[test]
fn validate_lists_tests() {
    let dir = tempfile::tempdir().unwrap();

    cadence(dir.path())
        .arg("validate")
        .arg(demo("smoke.toml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("4 test(s)"))
        .stdout(predicate::str::contains("background-work"))
        .stdout(predicate::str::contains("Plans are valid!"));
}

#[test]
fn validate_prints_json_summary() {
    let dir = tempfile::tempdir().unwrap();

    let output = cadence(dir.path())
        .arg("validate")
        .arg("--format")
        .arg("json")
        .arg(demo("smoke.toml"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let summaries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summaries[0]["tests"][0], "echo-roundtrip");
    assert_eq!(summaries[0]["tests"].as_array().unwrap().len(), 4);
}

#[test]
fn validate_rejects_unknown_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("bad.toml");
    std::fs::write(
        &plan,
        r#"
        [[test]]
        name = "jms"
        actions = [{ type = "send", endpoint = "jms", payload = "hello" }]
        "#,
    )
    .unwrap();

    cadence(dir.path())
        .arg("validate")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown endpoint 'jms'"));
}

#[test]
fn unsupported_fault_strategy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("cadence.toml");
    std::fs::write(&config, "[engine]\nfault_strategy = \"ignore\"\n").unwrap();

    cadence(dir.path())
        .arg("run")
        .arg(demo("smoke.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid engine configuration"));
}

#[test]
fn run_requires_a_plan() {
    let dir = tempfile::tempdir().unwrap();

    cadence(dir.path()).arg("run").assert().failure();
}

#[test]
fn init_writes_default_config_once() {
    let dir = tempfile::tempdir().unwrap();

    cadence(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created cadence.toml"));

    let content = std::fs::read_to_string(dir.path().join("cadence.toml")).unwrap();
    assert!(content.contains("max_workers = 4"));

    cadence(dir.path()).arg("init").assert().failure();
}
