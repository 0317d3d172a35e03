use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{now}", std::process::id()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_rk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_rk"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute rk binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
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

fn as_f64(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("missing numeric field `{key}` in payload: {value}"))
}

fn as_bool(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing boolean field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write_json_file(path: &Path, value: &Value) {
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| panic!("failed to serialize fixture JSON: {err}"));
    fs::write(path, body)
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
}

fn product(name: &str, category: &str, quantity: f64) -> Value {
    serde_json::json!({
        "name": name,
        "category": category,
        "quantity": quantity,
        "unit_of_measure": "g"
    })
}

// Test IDs: TCLE-001
#[test]
fn db_migrate_and_schema_version_round_trip() {
    let dir = unique_temp_dir("rk-db");
    let db = dir.join("memory.sqlite3");

    let migrated = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), 1);
    assert!(as_bool(&migrated, "up_to_date"));
    assert_eq!(as_str(&migrated, "contract_version"), "cli.v1");

    let status = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&status, "current_version"), 1);
    assert_eq!(as_i64(&status, "target_version"), 1);
    assert!(as_bool(&status, "up_to_date"));

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-002
#[test]
fn memory_confirm_list_and_forget_flow() {
    let dir = unique_temp_dir("rk-memory");
    let db = dir.join("memory.sqlite3");

    let entry = run_json([
        "--db",
        path_str(&db),
        "memory",
        "confirm",
        "--pos-name",
        "OG Kush Prerol - 1g",
        "--production-name",
        "OG Kush Preroll",
    ]);
    assert_eq!(as_str(&entry, "pos_name_normalized"), "og kush prerol");
    assert_eq!(as_str(&entry, "production_name_normalized"), "og kush preroll");

    let listed = run_json(["--db", path_str(&db), "memory", "list"]);
    assert_eq!(as_i64(&listed, "count"), 1);

    let removed = run_json([
        "--db",
        path_str(&db),
        "memory",
        "forget",
        "--pos-name",
        "OG Kush Prerol - 1g",
    ]);
    assert!(as_bool(&removed, "removed"));

    let listed_after = run_json(["--db", path_str(&db), "memory", "list"]);
    assert_eq!(as_i64(&listed_after, "count"), 0);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-003
#[test]
fn reconcile_applies_confirmed_memory() {
    let dir = unique_temp_dir("rk-reconcile");
    let db = dir.join("memory.sqlite3");
    let pos_file = dir.join("pos.json");
    let production_file = dir.join("production.json");

    write_json_file(&pos_file, &Value::Array(vec![product("BD Special 1g", "Flower", 3.0)]));
    write_json_file(
        &production_file,
        &Value::Array(vec![
            product("Blue Dream", "Flower", 100.0),
            product("Boysenberry Dream", "Flower", 40.0),
        ]),
    );

    let _entry = run_json([
        "--db",
        path_str(&db),
        "memory",
        "confirm",
        "--pos-name",
        "BD Special 1g",
        "--production-name",
        "Boysenberry Dream",
    ]);

    let run = run_json([
        "--db",
        path_str(&db),
        "reconcile",
        "--pos-file",
        path_str(&pos_file),
        "--production-file",
        path_str(&production_file),
        "--location",
        "lewiston",
    ]);

    assert!(as_bool(&run, "memory_available"));
    assert_eq!(as_i64(&run, "memory_entries"), 1);
    assert!(as_str(&run, "snapshot_id").starts_with("run_"));

    let report = run
        .get("report")
        .unwrap_or_else(|| panic!("missing report in payload: {run}"));
    let auto_matched = as_array(report, "auto_matched");
    assert_eq!(auto_matched.len(), 1);
    assert_eq!(as_str(&auto_matched[0], "source"), "memory");
    assert_eq!(as_i64(&auto_matched[0], "score"), 100);
    assert_eq!(as_i64(&auto_matched[0], "production_index"), 1);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-004
#[test]
fn reconcile_confirm_override_persists_to_memory() {
    let dir = unique_temp_dir("rk-override");
    let db = dir.join("memory.sqlite3");
    let pos_file = dir.join("pos.json");
    let production_file = dir.join("production.json");

    write_json_file(&pos_file, &Value::Array(vec![product("OGK Prerolls 5pk", "Prerolls", 12.0)]));
    write_json_file(
        &production_file,
        &Value::Array(vec![product("OG Kush Preroll", "Prerolls", 200.0)]),
    );

    let run = run_json([
        "--db",
        path_str(&db),
        "reconcile",
        "--pos-file",
        path_str(&pos_file),
        "--production-file",
        path_str(&production_file),
        "--override",
        "0:confirm:0",
    ]);

    let report = run
        .get("report")
        .unwrap_or_else(|| panic!("missing report in payload: {run}"));
    let auto_matched = as_array(report, "auto_matched");
    assert_eq!(auto_matched.len(), 1);
    assert_eq!(as_str(&auto_matched[0], "source"), "confirmed");

    let listed = run_json(["--db", path_str(&db), "memory", "list"]);
    assert_eq!(as_i64(&listed, "count"), 1);
    let entries = as_array(&listed, "entries");
    assert_eq!(as_str(&entries[0], "pos_name_normalized"), "ogk prerolls");

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-005
#[test]
fn order_end_to_end_prioritizes_and_numbers() {
    let dir = unique_temp_dir("rk-order");
    let db = dir.join("memory.sqlite3");
    let pos_file = dir.join("pos.json");
    let production_file = dir.join("production.json");

    write_json_file(
        &pos_file,
        &Value::Array(vec![
            product("Blue Dream - 1g", "Flower", 0.0),
            product("Sour Diesel Preroll", "Prerolls", 30.0),
        ]),
    );
    write_json_file(
        &production_file,
        &Value::Array(vec![
            product("Blue Dream", "Flower", 500.0),
            product("Sour Diesel Preroll", "Prerolls", 200.0),
            product("Gelato Diamonds", "Diamonds", 40.0),
        ]),
    );

    let run = run_json([
        "--db",
        path_str(&db),
        "order",
        "--pos-file",
        path_str(&pos_file),
        "--production-file",
        path_str(&production_file),
        "--location",
        "lewiston",
    ]);

    assert!(as_str(&run, "order_number").starts_with("RO-"));
    assert!(as_str(&run, "order_number").ends_with("-LEW"));

    let order = run.get("order").unwrap_or_else(|| panic!("missing order in payload: {run}"));
    let summary = order
        .get("summary")
        .unwrap_or_else(|| panic!("missing order summary in payload: {run}"));
    assert_eq!(as_i64(summary, "critical"), 1);
    assert_eq!(as_i64(summary, "high"), 1);
    assert_eq!(as_i64(summary, "new_products"), 1);
    assert_eq!(as_i64(summary, "total"), 3);

    let items = as_array(order, "order_items");
    let priorities: Vec<&str> = items.iter().map(|item| as_str(item, "priority")).collect();
    assert_eq!(priorities, vec!["critical", "high", "normal"]);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-006
#[test]
fn order_honors_custom_threshold_table() {
    let dir = unique_temp_dir("rk-thresholds");
    let db = dir.join("memory.sqlite3");
    let pos_file = dir.join("pos.json");
    let production_file = dir.join("production.json");
    let thresholds_file = dir.join("thresholds.json");

    write_json_file(&pos_file, &Value::Array(vec![product("Blue Dream", "Flower", 500.0)]));
    write_json_file(&production_file, &Value::Array(vec![product("Blue Dream", "Flower", 900.0)]));
    write_json_file(
        &thresholds_file,
        &serde_json::json!({
            "categories": {
                "Flower": { "reorder_below": 1000.0, "order_quantity": 112.0, "unit": "g" }
            },
            "default": null
        }),
    );

    let run = run_json([
        "--db",
        path_str(&db),
        "order",
        "--pos-file",
        path_str(&pos_file),
        "--production-file",
        path_str(&production_file),
        "--thresholds-file",
        path_str(&thresholds_file),
    ]);

    let order = run.get("order").unwrap_or_else(|| panic!("missing order in payload: {run}"));
    let items = as_array(order, "order_items");
    assert_eq!(items.len(), 1);
    assert_eq!(as_str(&items[0], "priority"), "high");
    assert!((as_f64(&items[0], "requested_quantity") - 112.0).abs() < f64::EPSILON);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLE-007
#[test]
fn reconcile_fails_loudly_on_missing_input_file() {
    let dir = unique_temp_dir("rk-missing");
    let db = dir.join("memory.sqlite3");
    let production_file = dir.join("production.json");
    write_json_file(&production_file, &Value::Array(vec![]));

    let output = run_rk([
        "--db",
        path_str(&db),
        "reconcile",
        "--pos-file",
        path_str(&dir.join("does-not-exist.json")),
        "--production-file",
        path_str(&production_file),
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to read product file"),
        "unexpected stderr: {stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}
