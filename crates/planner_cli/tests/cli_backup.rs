use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn planner(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_planner"))
        .args(args)
        .env("PLANNER_DATA_DIR", dir)
        .env("PLANNER_CONFIG_PATH", dir.join("config.json"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run planner")
}

fn planner_json(dir: &Path, args: &[&str]) -> Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let output = planner(dir, &full);
    assert!(
        output.status.success(),
        "planner {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn restore_brings_back_a_deleted_task() {
    let dir = TempDir::new().expect("tempdir");
    let added = planner_json(dir.path(), &["add", "keep me"]);
    let id = added["id"].as_str().expect("id").to_string();

    let backup = planner_json(dir.path(), &["backup", "create"]);
    let name = backup["file_name"].as_str().expect("file name").to_string();
    assert_eq!(backup["reason"], "manual");

    planner_json(dir.path(), &["delete", &id]);
    assert!(!planner(dir.path(), &["show", &id]).status.success());

    planner_json(dir.path(), &["backup", "restore", &name]);
    let shown = planner_json(dir.path(), &["show", &id]);
    assert_eq!(shown["heading"], "keep me");
}

#[test]
fn backup_list_includes_automatic_backups() {
    let dir = TempDir::new().expect("tempdir");
    planner_json(dir.path(), &["add", "one"]);
    planner_json(dir.path(), &["add", "two"]);

    let listed = planner_json(dir.path(), &["backup", "list"]);
    let reasons: Vec<&str> = listed
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|backup| backup["reason"].as_str())
        .collect();
    assert!(reasons.contains(&"auto"));
}

#[test]
fn restore_of_unknown_backup_fails() {
    let dir = TempDir::new().expect("tempdir");
    let output = planner(
        dir.path(),
        &["backup", "restore", "backup_20200101_000000_000000_manual.json"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("backup not found"));
}

#[test]
fn corrupted_document_halts_and_is_quarantined() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("planner_data.json"), "{ broken").expect("write");

    let output = planner(dir.path(), &["list"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ERROR: corrupted_store"));

    let quarantined: Vec<String> = std::fs::read_dir(dir.path().join("backups"))
        .expect("backups dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with("_corrupted.json"))
        .collect();
    assert_eq!(quarantined.len(), 1);
}

#[test]
fn disabling_auto_backup_stops_new_backups() {
    let dir = TempDir::new().expect("tempdir");
    let settings = planner_json(dir.path(), &["backup", "settings", "--auto", "false"]);
    assert_eq!(settings["auto_backup"], false);

    planner_json(dir.path(), &["add", "quiet"]);
    let listed = planner_json(dir.path(), &["backup", "list"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}

#[test]
fn export_then_import_into_another_store() {
    let source = TempDir::new().expect("tempdir");
    let target = TempDir::new().expect("tempdir");
    let export_path = source.path().join("alice.json");
    let export_arg = export_path.to_string_lossy().to_string();

    planner_json(source.path(), &["--user", "alice", "add", "portable"]);
    planner_json(source.path(), &["--user", "alice", "export", &export_arg]);

    let imported = planner_json(target.path(), &["import", &export_arg]);
    assert_eq!(imported["user_id"], "alice");

    let tasks = planner_json(target.path(), &["--user", "alice", "list"]);
    assert_eq!(tasks[0]["heading"], "portable");
}

#[test]
fn export_of_unknown_user_fails() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ghost.json");
    let path_arg = path.to_string_lossy().to_string();
    let output = planner(dir.path(), &["--user", "ghost", "export", &path_arg]);

    assert!(!output.status.success());
    assert!(!path.exists());
}

#[test]
fn config_override_relocates_the_data_dir() {
    let dir = TempDir::new().expect("tempdir");
    let elsewhere = dir.path().join("elsewhere");
    let override_arg = format!("data_dir={}", elsewhere.display());

    let output = planner(
        dir.path(),
        &["--config-override", &override_arg, "add", "moved"],
    );
    assert!(output.status.success());
    assert!(elsewhere.join("planner_data.json").exists());
    assert!(!dir.path().join("planner_data.json").exists());
}

#[test]
fn unknown_config_override_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let output = planner(dir.path(), &["--config-override", "theme=dark", "list"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown config field"));
}

#[test]
fn clear_all_removes_every_user() {
    let dir = TempDir::new().expect("tempdir");
    planner_json(dir.path(), &["--user", "a", "add", "x"]);
    planner_json(dir.path(), &["--user", "b", "add", "y"]);

    let cleared = planner_json(dir.path(), &["clear", "--all"]);
    assert_eq!(cleared["removed"], 2);
    let listed = planner_json(dir.path(), &["--user", "a", "list"]);
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}
