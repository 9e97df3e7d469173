use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cyl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cyl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[workspace]
root = "{}/workspace"

[lock]
retries = 2
retry_delay_ms = 10

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("cyl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn workspace(tmp: &TempDir) -> PathBuf {
    tmp.path().join("workspace")
}

fn run_cyl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cyl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cyl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ledger_lines(tmp: &TempDir) -> Vec<serde_json::Value> {
    fs::read_to_string(workspace(tmp).join("ledger/ledger.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_init_creates_layout() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cyl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let ws = workspace(&tmp);
    assert!(ws.join("ledger/ledger.jsonl").is_file());
    assert!(ws.join("ledger/cycles.jsonl").is_file());
    assert!(ws.join("cache").is_dir());
    assert!(ws.join("artifacts").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    run_cyl(&config_path, &["init"]);
    run_cyl(
        &config_path,
        &["append", "--type", "adr", "--target", "adr-1"],
    );

    let (_, _, success) = run_cyl(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
    assert_eq!(ledger_lines(&tmp).len(), 1, "init must not truncate the ledger");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cyl(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_append_chains_entries() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let (stdout, stderr, success) = run_cyl(
        &config_path,
        &[
            "append",
            "--type",
            "ADR",
            "--target",
            "adr-7",
            "--data",
            r#"{"title": "Use JSONL", "status": "accepted"}"#,
        ],
    );
    assert!(success, "append failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ADR"));

    let (_, _, success) = run_cyl(
        &config_path,
        &["append", "--type", "evidence", "--target", "adr-7"],
    );
    assert!(success);

    let lines = ledger_lines(&tmp);
    assert_eq!(lines.len(), 2);
    assert!(lines[0]["previous_hash"].is_null());
    assert_eq!(lines[1]["previous_hash"], lines[0]["current_hash"]);
    assert_eq!(lines[0]["data"]["title"], "Use JSONL");
    assert_eq!(lines[1]["type"], "EVIDENCE");

    let (stdout, _, success) = run_cyl(&config_path, &["verify"]);
    assert!(success, "verify failed: {}", stdout);
    assert!(stdout.contains("Chain OK"));
}

#[test]
fn test_append_rejects_bad_input() {
    let (_tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let (_, stderr, success) = run_cyl(
        &config_path,
        &["append", "--type", "memo", "--target", "x"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown entry type"));

    let (_, _, success) = run_cyl(
        &config_path,
        &["append", "--type", "adr", "--target", "x", "--data", "[1]"],
    );
    assert!(!success);
}

#[test]
fn test_verify_and_repair_broken_ledger() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);
    for target in ["a", "b", "c"] {
        run_cyl(
            &config_path,
            &["append", "--type", "manifest", "--target", target],
        );
    }

    // Corrupt the middle link and add a garbage line
    let ledger = workspace(&tmp).join("ledger/ledger.jsonl");
    let mut lines = ledger_lines(&tmp);
    lines[1]["previous_hash"] = serde_json::json!("deadbeef");
    let mut body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    body.push_str("{not json\n");
    fs::write(&ledger, body).unwrap();

    let (stdout, _, success) = run_cyl(&config_path, &["verify", "--json"]);
    assert!(!success, "verify should fail on a broken chain");
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["valid"], false);
    assert_eq!(report["valid_entries"], 3);
    assert_eq!(report["invalid"].as_array().unwrap().len(), 1);
    assert_eq!(report["breaks"][0]["index"], 1);

    // Dry run changes nothing
    let before = fs::read_to_string(&ledger).unwrap();
    let (stdout, _, success) = run_cyl(&config_path, &["repair", "--dry-run", "--json"]);
    assert!(success);
    let dry: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(dry["dryRun"], true);
    assert_eq!(dry["removedCount"], 1);
    assert_eq!(fs::read_to_string(&ledger).unwrap(), before);

    let (stdout, stderr, success) = run_cyl(&config_path, &["repair", "--json"]);
    assert!(success, "repair failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["finalLength"], 3);
    assert_eq!(report["removedCount"], 1);
    assert!(report["backupPath"].is_string());
    let rejected = fs::read_to_string(workspace(&tmp).join("ledger/ledger.jsonl.rejected")).unwrap();
    assert_eq!(rejected, "{not json\n");

    let (_, _, success) = run_cyl(&config_path, &["verify"]);
    assert!(success, "ledger should verify after repair");

    // A second repair is a no-op
    let (stdout, _, success) = run_cyl(&config_path, &["repair"]);
    assert!(success);
    assert!(stdout.contains("Nothing to repair"));
}

#[test]
fn test_record_and_rebuild() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let cycles = [
        ("2024-01-01T09:00:00Z", "0.2", "patterns=2:src/a.rs,src/b.rs"),
        ("2024-01-01T09:30:00Z", "0.6", "patterns=1:src/a.rs"),
        ("2024-01-02T14:00:00Z", "0.5", "forecast=1"),
    ];
    for (ts, load, phase) in cycles {
        let (stdout, stderr, success) = run_cyl(
            &config_path,
            &["record", "--timestamp", ts, "--load", load, "--phase", phase],
        );
        assert!(success, "record failed: stdout={}, stderr={}", stdout, stderr);
    }

    let (stdout, stderr, success) = run_cyl(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("3 cycles"));
    assert!(stdout.contains("2 days"));
    assert!(stdout.contains("2 timelines"));

    let index_path = workspace(&tmp).join("cache/index.json");
    let first = fs::read_to_string(&index_path).unwrap();
    let index: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(index["by_file"]["src/a.rs"], serde_json::json!([1, 2]));
    assert_eq!(index["by_hour"]["09"], serde_json::json!([1, 2]));

    // Rebuilds are byte-identical
    run_cyl(&config_path, &["rebuild"]);
    assert_eq!(fs::read_to_string(&index_path).unwrap(), first);

    let (stdout, _, success) = run_cyl(&config_path, &["timeline", "2024-01-01", "--json"]);
    assert!(success);
    let timeline: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(timeline["total_cycles"], 2);
    assert_eq!(timeline["most_active_hour"], 9);
    assert!((timeline["cognitive_load_avg"].as_f64().unwrap() - 0.4).abs() < 1e-9);
}

#[test]
fn test_record_rejects_bad_timestamp() {
    let (_tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);
    let (_, _, success) = run_cyl(&config_path, &["record", "--timestamp", "yesterday"]);
    assert!(!success);
}

#[test]
fn test_timeline_empty_day() {
    let (_tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let (stdout, _, success) = run_cyl(&config_path, &["timeline", "2030-06-01"]);
    assert!(success);
    assert!(stdout.contains("No cycles recorded"));

    let (_, stderr, success) = run_cyl(&config_path, &["timeline", "June 1st"]);
    assert!(!success);
    assert!(stderr.contains("Invalid date"));
}

#[test]
fn test_snapshot_written() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let (stdout, _, success) = run_cyl(&config_path, &["snapshot"]);
    assert!(success);
    assert!(stdout.contains("No cycles recorded yet"));

    run_cyl(&config_path, &["record", "--phase", "patterns=1"]);
    fs::write(
        workspace(&tmp).join("artifacts/mental_state.json"),
        r#"{"mood": "curious", "confidence": 0.7}"#,
    )
    .unwrap();

    let (stdout, _, success) = run_cyl(&config_path, &["snapshot", "--print"]);
    assert!(success);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["cycleId"], 1);
    assert_eq!(snapshot["mood"], "curious");
    assert!(workspace(&tmp)
        .join("artifacts/context_snapshot.json")
        .is_file());
}

#[test]
fn test_normalize_idempotent() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);

    let patterns = workspace(&tmp).join("artifacts/patterns.json");
    fs::write(&patterns, r#"{"patterns": [{"id": 1}, {"id": 2}]}"#).unwrap();

    let (stdout, _, success) = run_cyl(&config_path, &["normalize", "--json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["actions_performed"].as_array().unwrap().len(), 1);

    let rewritten: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&patterns).unwrap()).unwrap();
    assert_eq!(rewritten, serde_json::json!([{"id": 1}, {"id": 2}]));

    let (stdout, _, success) = run_cyl(&config_path, &["normalize"]);
    assert!(success);
    assert!(stdout.contains("All artifacts canonical"));
}

#[test]
fn test_validate_exit_codes() {
    let (tmp, config_path) = setup_test_env();

    // Nothing initialized: fatal
    let (stdout, _, success) = run_cyl(&config_path, &["validate"]);
    assert!(!success);
    assert!(stdout.contains("FATAL"));

    run_cyl(&config_path, &["init"]);
    run_cyl(&config_path, &["record"]);
    let (stdout, _, success) = run_cyl(&config_path, &["validate", "--json"]);
    assert!(success, "validate failed: {}", stdout);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["cycles"], 1);
    assert!(report["fatal"].as_array().unwrap().is_empty());

    // Tampered hash is fatal
    let ledger = workspace(&tmp).join("ledger/ledger.jsonl");
    run_cyl(&config_path, &["append", "--type", "adr", "--target", "a"]);
    let tampered = fs::read_to_string(&ledger).unwrap().replace("\"a\"", "\"b\"");
    fs::write(&ledger, tampered).unwrap();
    let (_, _, success) = run_cyl(&config_path, &["validate"]);
    assert!(!success);
}

#[test]
fn test_stats_summary() {
    let (_tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);
    run_cyl(&config_path, &["append", "--type", "adr", "--target", "a"]);
    run_cyl(&config_path, &["record"]);

    let (stdout, stderr, success) = run_cyl(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Workspace Stats"));
    assert!(stdout.contains("Cycles:      1"));
    assert!(stdout.contains("ADR"));
}

#[test]
fn test_invalid_utf8_lines_are_recoverable() {
    let (tmp, config_path) = setup_test_env();
    run_cyl(&config_path, &["init"]);
    run_cyl(&config_path, &["append", "--type", "adr", "--target", "a"]);
    run_cyl(&config_path, &["record", "--timestamp", "2024-01-01T09:00:00Z"]);

    let ws = workspace(&tmp);
    for log in ["ledger/ledger.jsonl", "ledger/cycles.jsonl"] {
        let mut bytes = fs::read(ws.join(log)).unwrap();
        bytes.extend_from_slice(b"\xff\xfe\n");
        fs::write(ws.join(log), bytes).unwrap();
    }

    let (stdout, stderr, success) = run_cyl(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert!(stdout.contains("1 cycles"));

    let (stdout, _, success) = run_cyl(&config_path, &["validate"]);
    assert!(success, "invalid lines must only warn: {}", stdout);

    let (stdout, stderr, success) = run_cyl(&config_path, &["repair", "--json"]);
    assert!(success, "repair failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["removedCount"], 1);
    assert_eq!(report["finalLength"], 1);
    assert_eq!(
        fs::read(ws.join("ledger/ledger.jsonl.rejected")).unwrap(),
        b"\xff\xfe\n".to_vec()
    );

    let (_, _, success) = run_cyl(&config_path, &["verify"]);
    assert!(success);
}
