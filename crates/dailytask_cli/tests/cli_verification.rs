use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("dailytask-{nanos}-{file_name}"))
}

fn write_store(path: &Path, in_progress: serde_json::Value) {
    let content = serde_json::json!({
        "schema_version": 2,
        "tasks": [
            {
                "id": "task-1",
                "title": "Like the launch post",
                "kind": "like",
                "active_from": "2020-01-01T00:00:00Z",
                "active_until": "2099-01-01T00:00:00Z",
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2020-01-01T00:00:00Z",
                "completions": [],
                "in_progress": in_progress,
                "revision": 0
            }
        ]
    });
    std::fs::write(path, serde_json::to_string_pretty(&content).unwrap()).unwrap();
}

fn run(store_path: &Path, user_id: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dailytask"))
        .args(args)
        .env("DAILYTASK_STORE_PATH", store_path)
        .env("DAILYTASK_CONFIG_PATH", store_path.with_extension("config.json"))
        .env("DAILYTASK_USER_ID", user_id)
        .env_remove("DAILYTASK_USER_ROLE")
        .output()
        .expect("failed to run dailytask")
}

fn read_store(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn start_then_complete_records_and_enters_cooldown() {
    let store_path = temp_path("cli-flow.json");
    write_store(&store_path, serde_json::json!({}));

    let started = run(&store_path, "u1", &["start", "task-1", "--json"]);
    assert!(started.status.success());
    let window: serde_json::Value = serde_json::from_slice(&started.stdout).unwrap();
    let started_at =
        OffsetDateTime::parse(window["started_at"].as_str().unwrap(), &Rfc3339).unwrap();
    let expires_at =
        OffsetDateTime::parse(window["expires_at"].as_str().unwrap(), &Rfc3339).unwrap();
    assert_eq!((expires_at - started_at).whole_seconds(), 60);

    let completed = run(&store_path, "u1", &["complete", "task-1", "--json"]);
    assert!(completed.status.success());
    let result: serde_json::Value = serde_json::from_slice(&completed.stdout).unwrap();
    assert_eq!(result["result"], "recorded");

    let status = run(&store_path, "u1", &["status", "task-1", "--json"]);
    assert!(status.status.success());
    let status: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(status["state"]["state"], "cooling_down");

    let restarted = run(&store_path, "u1", &["start", "task-1"]);
    let stored = read_store(&store_path);
    std::fs::remove_file(&store_path).ok();

    assert!(!restarted.status.success());
    let stderr = String::from_utf8_lossy(&restarted.stderr);
    assert!(stderr.starts_with("ERROR: cooldown_active"));

    let completions = stored["tasks"][0]["completions"].as_array().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0]["user_id"], "u1");
    assert_eq!(completions[0]["outcome"], true);
    assert!(stored["tasks"][0]["in_progress"].as_object().unwrap().is_empty());
}

#[test]
fn second_start_reports_already_verifying() {
    let store_path = temp_path("cli-double-start.json");
    write_store(&store_path, serde_json::json!({}));

    let first = run(&store_path, "u1", &["start", "task-1"]);
    assert!(first.status.success());
    assert!(String::from_utf8_lossy(&first.stdout).contains("Verification started"));

    let second = run(&store_path, "u1", &["start", "task-1"]);
    let other_user = run(&store_path, "u2", &["start", "task-1"]);
    let stored = read_store(&store_path);
    std::fs::remove_file(&store_path).ok();

    assert!(!second.status.success());
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.starts_with("ERROR: already_verifying"));

    assert!(other_user.status.success());
    assert_eq!(
        stored["tasks"][0]["in_progress"].as_object().unwrap().len(),
        2
    );
}

#[test]
fn complete_without_start_is_rejected() {
    let store_path = temp_path("cli-no-start.json");
    write_store(&store_path, serde_json::json!({}));

    let output = run(&store_path, "u1", &["complete", "task-1"]);
    let stored = read_store(&store_path);
    std::fs::remove_file(&store_path).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("ERROR: no_active_verification"));
    assert_eq!(stored["tasks"][0]["revision"], 0);
}

#[test]
fn failed_completion_abandons_without_cooldown() {
    let store_path = temp_path("cli-failed.json");
    write_store(&store_path, serde_json::json!({}));

    assert!(run(&store_path, "u1", &["start", "task-1"]).status.success());
    let abandoned = run(&store_path, "u1", &["complete", "task-1", "--failed"]);
    assert!(abandoned.status.success());
    assert!(String::from_utf8_lossy(&abandoned.stdout).contains("abandoned"));

    let restarted = run(&store_path, "u1", &["start", "task-1"]);
    std::fs::remove_file(&store_path).ok();

    assert!(restarted.status.success());
}

#[test]
fn missing_user_is_rejected() {
    let store_path = temp_path("cli-no-user.json");
    write_store(&store_path, serde_json::json!({}));

    let output = Command::new(env!("CARGO_BIN_EXE_dailytask"))
        .args(["start", "task-1"])
        .env("DAILYTASK_STORE_PATH", &store_path)
        .env("DAILYTASK_CONFIG_PATH", store_path.with_extension("config.json"))
        .env_remove("DAILYTASK_USER_ID")
        .output()
        .expect("failed to run dailytask");
    std::fs::remove_file(&store_path).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DAILYTASK_USER_ID"));
}

#[test]
fn lapsed_verification_is_reclaimed_on_start_and_by_sweep() {
    let lapsed = serde_json::json!({
        "u1": {
            "user_id": "u1",
            "started_at": "2024-01-01T00:00:00Z",
            "expires_at": "2024-01-01T00:01:00Z"
        },
        "u2": {
            "user_id": "u2",
            "started_at": "2024-01-01T00:00:00Z",
            "expires_at": "2024-01-01T00:01:00Z"
        }
    });
    let store_path = temp_path("cli-sweep.json");
    write_store(&store_path, lapsed);

    let restarted = run(&store_path, "u1", &["start", "task-1"]);
    assert!(restarted.status.success());

    let swept = run(&store_path, "u1", &["sweep", "--json"]);
    let stored = read_store(&store_path);
    std::fs::remove_file(&store_path).ok();

    assert!(swept.status.success());
    let report: serde_json::Value = serde_json::from_slice(&swept.stdout).unwrap();
    assert_eq!(report["tasks"][0]["task_id"], "task-1");
    assert_eq!(report["tasks"][0]["user_ids"], serde_json::json!(["u2"]));

    let in_progress = stored["tasks"][0]["in_progress"].as_object().unwrap();
    assert_eq!(in_progress.len(), 1);
    assert!(in_progress.contains_key("u1"));
    assert!(stored["tasks"][0]["completions"].as_array().unwrap().is_empty());
}

#[test]
fn short_windows_come_from_config_override() {
    let store_path = temp_path("cli-override.json");
    write_store(&store_path, serde_json::json!({}));

    let started = run(
        &store_path,
        "u1",
        &[
            "--config-override",
            "verification_seconds=5",
            "start",
            "task-1",
            "--json",
        ],
    );
    std::fs::remove_file(&store_path).ok();

    assert!(started.status.success());
    let window: serde_json::Value = serde_json::from_slice(&started.stdout).unwrap();
    let started_at =
        OffsetDateTime::parse(window["started_at"].as_str().unwrap(), &Rfc3339).unwrap();
    let expires_at =
        OffsetDateTime::parse(window["expires_at"].as_str().unwrap(), &Rfc3339).unwrap();
    assert_eq!((expires_at - started_at).whole_seconds(), 5);
}
