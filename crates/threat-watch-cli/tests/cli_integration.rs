use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", ulid::Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_tw<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_tw"))
        .env_remove("TW_DB")
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute tw binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tw(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "tw command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_bool(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing bool field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

#[test]
fn migrate_dry_run_then_apply() {
    let dir = unique_temp_dir("tw-cli-migrate");
    let db = dir.join("tw.sqlite3");

    let status = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_str(&status, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&status, "current_version"), 0);
    assert!(!as_bool(&status, "up_to_date"));

    let dry_run = run_json(["--db", path_str(&db), "db", "migrate", "--dry-run"]);
    assert!(as_bool(&dry_run, "dry_run"));
    assert_eq!(dry_run.get("would_apply_versions"), Some(&serde_json::json!([1])));

    let applied = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&applied, "after_version"), 1);
    assert!(as_bool(&applied, "up_to_date"));

    let integrity = run_json(["--db", path_str(&db), "db", "integrity-check"]);
    assert!(as_bool(&integrity, "ok"));

    let backup = dir.join("backups").join("tw-backup.sqlite3");
    let backed_up = run_json(["--db", path_str(&db), "db", "backup", "--out", path_str(&backup)]);
    assert_eq!(as_str(&backed_up, "backup_path"), path_str(&backup));
    assert!(backup.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn seeded_keywords_drive_offline_scoring() {
    let dir = unique_temp_dir("tw-cli-keywords");
    let db = dir.join("tw.sqlite3");

    let empty = run_json(["--db", path_str(&db), "score", "--text", "anti india protest"]);
    assert_eq!(as_i64(&empty, "keyword_count"), 0);
    assert_eq!(as_i64(&empty, "keyword_score"), 0);

    let seeded = run_json(["--db", path_str(&db), "keywords", "seed-defaults"]);
    assert_eq!(as_i64(&seeded, "inserted"), 5);
    assert_eq!(as_i64(&seeded, "keyword_count"), 5);

    let reseeded = run_json(["--db", path_str(&db), "keywords", "seed-defaults"]);
    assert_eq!(as_i64(&reseeded, "inserted"), 0);

    let scored = run_json(["--db", path_str(&db), "score", "--text", "Anti India protest"]);
    assert_eq!(as_i64(&scored, "keyword_score"), -10);
    assert_eq!(as_str(&scored, "threat_level"), "high");
    assert_eq!(scored.get("matched_keywords"), Some(&serde_json::json!(["anti india"])));

    let added = run_json([
        "--db",
        path_str(&db),
        "keywords",
        "add",
        "--keyword",
        "  Anti India ",
        "--category",
        "political",
        "--weight",
        "10",
        "--inactive",
    ]);
    assert_eq!(as_str(&added, "keyword"), "anti india");
    assert_eq!(as_str(&added, "outcome"), "updated");

    let listed = run_json(["--db", path_str(&db), "keywords", "list"]);
    let keywords = listed
        .get("keywords")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("keywords should be an array: {listed}"));
    assert_eq!(keywords.len(), 5);

    let rescored = run_json(["--db", path_str(&db), "score", "--text", "anti india protest"]);
    assert_eq!(as_i64(&rescored, "keyword_score"), 0);
    assert_eq!(as_i64(&rescored, "keyword_count"), 4);

    let builtin = run_json([
        "--db",
        path_str(&db),
        "score",
        "--text",
        "anti india protest",
        "--default-keywords",
    ]);
    assert_eq!(as_i64(&builtin, "keyword_score"), -10);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_keyword_fails_without_writing() {
    let dir = unique_temp_dir("tw-cli-invalid");
    let db = dir.join("tw.sqlite3");

    let output = run_tw([
        "--db",
        path_str(&db),
        "keywords",
        "add",
        "--keyword",
        "spam",
        "--category",
        "noise",
        "--weight",
        "0",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid keyword rule"), "unexpected stderr: {stderr}");

    let listed = run_json(["--db", path_str(&db), "keywords", "list"]);
    assert_eq!(listed.get("keywords"), Some(&serde_json::json!([])));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn alerts_and_dashboard_on_empty_database() {
    let dir = unique_temp_dir("tw-cli-alerts");
    let db = dir.join("tw.sqlite3");

    let alerts = run_json(["--db", path_str(&db), "alerts", "list", "--limit", "5"]);
    assert_eq!(alerts.get("alerts"), Some(&serde_json::json!([])));

    let resolved =
        run_json(["--db", path_str(&db), "alerts", "resolve", "--alert-id", "alert-missing"]);
    assert_eq!(as_str(&resolved, "alert_id"), "alert-missing");
    assert!(!as_bool(&resolved, "resolved"));

    let dashboard = run_json(["--db", path_str(&db), "dashboard"]);
    assert_eq!(dashboard.get("threat_stats"), Some(&serde_json::json!({})));
    assert_eq!(dashboard.get("recent_threats"), Some(&serde_json::json!([])));
    assert_eq!(dashboard.get("top_authors"), Some(&serde_json::json!([])));

    let _ = fs::remove_dir_all(&dir);
}
