use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shotsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shotsync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Screenshot tree: one exact folder match, one partial, one orphan.
    let screenshots = root.join("screenshots");
    fs::create_dir_all(screenshots.join("BTC Turk/Onboarding")).unwrap();
    fs::create_dir_all(screenshots.join("BTC Turk/Staking")).unwrap();
    fs::create_dir_all(screenshots.join("Binance/Random")).unwrap();
    fs::write(
        screenshots.join("BTC Turk/Onboarding/IMG_001.png"),
        b"fake png bytes 1",
    )
    .unwrap();
    fs::write(
        screenshots.join("BTC Turk/Staking/IMG_002.png"),
        b"fake png bytes 22",
    )
    .unwrap();
    fs::write(
        screenshots.join("Binance/Random/IMG_003.png"),
        b"fake png bytes 333",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/shotsync.sqlite"

[scan]
root = "{root}/screenshots"

[[seed.competitors]]
name = "Binance"
region = "Global"

[[seed.competitors]]
name = "Binance Global"
region = "Global"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("shotsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_shotsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shotsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shotsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// The report count lines, for diffing dry-run against write output.
fn count_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| {
            l.starts_with("  scanned:")
                || l.starts_with("  classified:")
                || l.starts_with("  orphaned:")
                || l.starts_with("  created:")
                || l.starts_with("  skipped duplicates:")
                || l.starts_with("  competitors created:")
                || l.starts_with("  failed:")
        })
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_shotsync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_shotsync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_shotsync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_seed_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);

    let (stdout1, _, success1) = run_shotsync(&config_path, &["seed"]);
    assert!(success1, "seed failed: {}", stdout1);
    assert!(stdout1.contains("features: 14 created"));
    assert!(stdout1.contains("competitors created: 2"));

    let (stdout2, _, success2) = run_shotsync(&config_path, &["seed"]);
    assert!(success2);
    assert!(stdout2.contains("features: 0 created, 14 updated"));
    assert!(stdout2.contains("competitors created: 0"));
}

#[test]
fn test_reconcile_classifies_and_creates() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);

    let (stdout, stderr, success) = run_shotsync(&config_path, &["reconcile"]);
    assert!(
        success,
        "reconcile failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("scanned: 3 files"), "stdout: {}", stdout);
    assert!(
        stdout.contains("classified: 1 folder-exact, 1 folder-partial, 0 filename-keyword"),
        "stdout: {}",
        stdout
    );
    // The unmatched file stays unassigned instead of defaulting.
    assert!(stdout.contains("orphaned: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("created: 3 screenshots"), "stdout: {}", stdout);
    // "BTC Turk" resolved through the alias table, "Binance" was seeded.
    assert!(stdout.contains("competitors created: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("failed: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reconcile_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);

    let (stdout1, _, _) = run_shotsync(&config_path, &["reconcile"]);
    assert!(stdout1.contains("created: 3 screenshots"));

    // Second run over unchanged input creates nothing.
    let (stdout2, _, success) = run_shotsync(&config_path, &["reconcile"]);
    assert!(success);
    assert!(stdout2.contains("created: 0 screenshots"), "stdout: {}", stdout2);
    assert!(
        stdout2.contains("skipped duplicates: 3"),
        "stdout: {}",
        stdout2
    );
    assert!(stdout2.contains("competitors created: 0"));
}

#[test]
fn test_dry_run_matches_write_counts() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);

    let (dry_stdout, _, dry_success) = run_shotsync(&config_path, &["reconcile", "--dry-run"]);
    assert!(dry_success);
    assert!(dry_stdout.contains("(dry-run)"));

    // Dry-run must not have touched the stores.
    let (write_stdout, _, write_success) = run_shotsync(&config_path, &["reconcile"]);
    assert!(write_success);

    assert_eq!(
        count_lines(&dry_stdout),
        count_lines(&write_stdout),
        "dry-run and write reports must carry identical counts"
    );
}

#[test]
fn test_dry_run_short_flag_and_no_writes() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);

    let (stdout, _, success) = run_shotsync(&config_path, &["reconcile", "-d"]);
    assert!(success);
    assert!(stdout.contains("dry-run: would create screenshot"));

    // A write run after a dry run still creates everything: nothing was
    // persisted by the dry run.
    let (stdout, _, _) = run_shotsync(&config_path, &["reconcile"]);
    assert!(stdout.contains("created: 3 screenshots"), "stdout: {}", stdout);
}

#[test]
fn test_validate_reports_classification_gap() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);
    run_shotsync(&config_path, &["reconcile"]);

    let (stdout, _, success) = run_shotsync(&config_path, &["validate"]);
    assert!(success, "validate failed: {}", stdout);
    assert!(stdout.contains("Validation Report"));
    assert!(stdout.contains("screenshots: 3 total"));
    // The orphan from Binance/Random is a gap, not an error.
    assert!(stdout.contains("classification-gap"), "stdout: {}", stdout);
    assert!(stdout.contains("issues: 0 errors"), "stdout: {}", stdout);
}

#[test]
fn test_merge_cli() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);
    run_shotsync(&config_path, &["reconcile"]);

    // Both Binance rows were seeded; the scan attached screenshots to
    // "Binance". Fold it into "Binance Global".
    let (stdout, stderr, success) =
        run_shotsync(&config_path, &["merge", "Binance Global", "Binance"]);
    assert!(success, "merge failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("merged competitors: 1"), "stdout: {}", stdout);

    // Re-running the merge is a no-op.
    let (stdout2, _, success2) =
        run_shotsync(&config_path, &["merge", "Binance Global", "Binance"]);
    assert!(success2);
    assert!(stdout2.contains("merged competitors: 0"));

    // The loser's screenshot now validates under the survivor.
    let (stdout3, _, _) = run_shotsync(&config_path, &["validate"]);
    assert!(stdout3.contains("issues: 0 errors"), "stdout: {}", stdout3);
}

#[test]
fn test_import_and_coverage() {
    let (tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);

    let rows = r#"[
        {
            "competitor": "BTC Turk",
            "region": "TR",
            "cells": {
                "Staking": "Var",
                "Dark Mode": "X",
                "Spot Trading": "",
                "Futures Trading": "belki",
                "Time Travel": "Yes"
            }
        }
    ]"#;
    let rows_path = tmp.path().join("matrix.json");
    fs::write(&rows_path, rows).unwrap();

    let (stdout, stderr, success) =
        run_shotsync(&config_path, &["import", rows_path.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("cells set: 2"), "stdout: {}", stdout);
    // "Time Travel" is outside the closed feature list.
    assert!(stdout.contains("unknown feature columns: 1"), "stdout: {}", stdout);
    // "belki" is outside the accepted value set: logged, treated as no.
    assert!(
        stdout.contains("unrecognized cell values: 1"),
        "stdout: {}",
        stdout
    );

    let (stdout, _, success) = run_shotsync(&config_path, &["coverage"]);
    assert!(success);
    assert!(stdout.contains("BTCTurk"), "stdout: {}", stdout);
    // 2 of 14 features = 14.3%
    assert!(stdout.contains("14.3%"), "stdout: {}", stdout);
}

#[test]
fn test_reconcile_missing_root_is_fatal() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);

    let (_, stderr, success) =
        run_shotsync(&config_path, &["reconcile", "--root", "/nonexistent/shotsync-root"]);
    assert!(!success, "missing scan root must exit non-zero");
    assert!(stderr.contains("scan root"), "stderr: {}", stderr);
}

#[test]
fn test_reclassify_dry_run() {
    let (_tmp, config_path) = setup_test_env();
    run_shotsync(&config_path, &["init"]);
    run_shotsync(&config_path, &["seed"]);
    run_shotsync(&config_path, &["reconcile"]);

    // The orphan stays an orphan (its path matches nothing), so
    // reclassify finds one candidate and assigns none.
    let (stdout, _, success) = run_shotsync(&config_path, &["reclassify", "--dry-run"]);
    assert!(success, "reclassify failed: {}", stdout);
    assert!(stdout.contains("candidates: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("still unclassified: 1"), "stdout: {}", stdout);
}
