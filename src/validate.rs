//! Cross-store referential integrity checks.
//!
//! Four independent checks, each individually reportable:
//!
//! - screenshot → competitor reference resolves (error, deletable)
//! - screenshot file exists under the storage root (error)
//! - screenshot MIME type is `image/*` (warning)
//! - `has_feature=true` cell has a screenshot or a justification note (info)
//!
//! A screenshot with no feature reference is a classification gap: it is
//! reported (info) and never deleted. The `--fix` pass removes only
//! referential violations.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db;

/// Issue severity, strongest first (sort order of the sample list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub check: &'static str,
    pub subject: String,
    pub message: String,
}

/// The sample list is capped so a badly drifted store cannot flood logs.
const SAMPLE_CAP: usize = 20;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub screenshots_total: u64,
    pub valid: u64,
    pub errors: u64,
    pub warnings: u64,
    pub infos: u64,
    /// At most [`SAMPLE_CAP`] issues, sorted by severity.
    pub sample: Vec<Issue>,
}

impl ValidationReport {
    pub fn summary_line(&self) -> String {
        format!(
            "validation: {} errors, {} warnings, {} info",
            self.errors, self.warnings, self.infos
        )
    }
}

struct ShotRow {
    id: String,
    file_path: String,
    mime_type: String,
    orphan_competitor: bool,
    feature_id: Option<String>,
}

async fn fetch_shots(pool: &SqlitePool) -> Result<Vec<ShotRow>> {
    // Flat rows: the competitor reference is checked directly.
    let flat: Vec<(String, String, String, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT s.id, s.file_path, s.mime_type, s.feature_id, c.id
        FROM screenshots s
        LEFT JOIN competitors c ON c.id = s.competitor_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    // Legacy rows: the chain through the relation must resolve too.
    let legacy: Vec<(String, String, String, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT rs.id, rs.file_path, rs.mime_type, cf.feature_id, c.id
        FROM relation_screenshots rs
        LEFT JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
        LEFT JOIN competitors c ON c.id = cf.competitor_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(flat
        .into_iter()
        .chain(legacy)
        .map(|(id, file_path, mime_type, feature_id, competitor)| ShotRow {
            id,
            file_path,
            mime_type,
            orphan_competitor: competitor.is_none(),
            feature_id,
        })
        .collect())
}

/// Run all checks read-only and produce a structured report.
pub async fn run_checks(pool: &SqlitePool, storage_root: &Path) -> Result<ValidationReport> {
    let shots = fetch_shots(pool).await?;

    let mut issues: Vec<Issue> = Vec::new();
    let mut flawed = std::collections::HashSet::new();

    for shot in &shots {
        if shot.orphan_competitor {
            flawed.insert(shot.id.clone());
            issues.push(Issue {
                severity: Severity::Error,
                check: "competitor-ref",
                subject: shot.file_path.clone(),
                message: "references a missing competitor".to_string(),
            });
            // The remaining checks assume a resolvable owner.
            continue;
        }

        if !storage_root.join(&shot.file_path).exists() {
            flawed.insert(shot.id.clone());
            issues.push(Issue {
                severity: Severity::Error,
                check: "missing-file",
                subject: shot.file_path.clone(),
                message: "missing file on storage backend".to_string(),
            });
        }

        if !shot.mime_type.starts_with("image/") {
            flawed.insert(shot.id.clone());
            issues.push(Issue {
                severity: Severity::Warning,
                check: "mime-type",
                subject: shot.file_path.clone(),
                message: format!("unexpected MIME type '{}'", shot.mime_type),
            });
        }

        if shot.feature_id.is_none() {
            flawed.insert(shot.id.clone());
            issues.push(Issue {
                severity: Severity::Info,
                check: "classification-gap",
                subject: shot.file_path.clone(),
                message: "no feature reference; needs manual classification".to_string(),
            });
        }
    }

    // Claimed features with nothing backing them.
    let unbacked: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT comp.name, f.name
        FROM competitor_features cf
        JOIN competitors comp ON comp.id = cf.competitor_id
        JOIN features f ON f.id = cf.feature_id
        WHERE cf.has_feature = 1
          AND (cf.notes IS NULL OR TRIM(cf.notes) = '')
          AND NOT EXISTS (
              SELECT 1 FROM screenshots s
              WHERE s.competitor_id = cf.competitor_id AND s.feature_id = cf.feature_id
          )
          AND NOT EXISTS (
              SELECT 1 FROM relation_screenshots rs WHERE rs.competitor_feature_id = cf.id
          )
        ORDER BY comp.name, f.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    for (competitor, feature) in unbacked {
        issues.push(Issue {
            severity: Severity::Info,
            check: "unbacked-cell",
            subject: format!("{} / {}", competitor, feature),
            message: "has_feature set without a screenshot or note".to_string(),
        });
    }

    let mut report = ValidationReport {
        screenshots_total: shots.len() as u64,
        valid: shots.len() as u64 - flawed.len() as u64,
        ..ValidationReport::default()
    };
    for issue in &issues {
        match issue.severity {
            Severity::Error => report.errors += 1,
            Severity::Warning => report.warnings += 1,
            Severity::Info => report.infos += 1,
        }
    }

    issues.sort_by_key(|i| i.severity);
    issues.truncate(SAMPLE_CAP);
    report.sample = issues;

    Ok(report)
}

/// Delete screenshots whose competitor reference no longer resolves.
/// Classification gaps are never touched. Returns the number removed.
pub async fn apply_fixes(pool: &SqlitePool) -> Result<u64> {
    let flat = sqlx::query(
        r#"
        DELETE FROM screenshots WHERE id IN (
            SELECT s.id FROM screenshots s
            LEFT JOIN competitors c ON c.id = s.competitor_id
            WHERE c.id IS NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let legacy = sqlx::query(
        r#"
        DELETE FROM relation_screenshots WHERE id IN (
            SELECT rs.id FROM relation_screenshots rs
            LEFT JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
            LEFT JOIN competitors c ON c.id = cf.competitor_id
            WHERE cf.id IS NULL OR c.id IS NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(flat.rows_affected() + legacy.rows_affected())
}

pub fn print_report(report: &ValidationReport) {
    println!("Validation Report");
    println!("=================");
    println!(
        "  screenshots: {} total, {} valid",
        report.screenshots_total, report.valid
    );
    println!(
        "  issues: {} errors, {} warnings, {} info",
        report.errors, report.warnings, report.infos
    );
    if !report.sample.is_empty() {
        println!("  sample (first {}, by severity):", SAMPLE_CAP);
        for issue in &report.sample {
            println!(
                "    [{}] {} {}: {}",
                issue.severity.as_str(),
                issue.check,
                issue.subject,
                issue.message
            );
        }
    }
}

/// CLI entry for `shotsync validate`.
pub async fn run_validate(config: &Config, fix: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = run_checks(&pool, &config.scan.root).await?;
    print_report(&report);

    if fix {
        let removed = apply_fixes(&pool).await?;
        println!("  removed {} invalid screenshot records", removed);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn test_pool() -> SqlitePool {
        // Match the documented production DB contract: foreign keys are
        // declared in the schema but not enforced at insert time, so
        // `validate` can observe and repair referential drift.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &SqlitePool, root: &Path) {
        sqlx::query("INSERT INTO competitors (id, name) VALUES ('c1', 'BTCTurk')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO features (id, name, category) VALUES ('f1', 'Staking', 'earn')")
            .execute(pool)
            .await
            .unwrap();

        std::fs::create_dir_all(root.join("BTCTurk/Staking")).unwrap();
        std::fs::write(root.join("BTCTurk/Staking/ok.png"), b"png").unwrap();

        // Healthy screenshot.
        sqlx::query(
            "INSERT INTO screenshots (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('s-ok', 'c1', 'f1', 'ok.png', 'BTCTurk/Staking/ok.png', 3, 'image/png', 0)",
        )
        .execute(pool)
        .await
        .unwrap();
        // Referential violation: competitor is gone.
        sqlx::query(
            "INSERT INTO screenshots (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('s-orphan', 'gone', 'f1', 'x.png', 'Gone/x.png', 3, 'image/png', 0)",
        )
        .execute(pool)
        .await
        .unwrap();
        // Classification gap: no feature, file present.
        std::fs::write(root.join("BTCTurk/Staking/gap.png"), b"png").unwrap();
        sqlx::query(
            "INSERT INTO screenshots (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('s-gap', 'c1', NULL, 'gap.png', 'BTCTurk/Staking/gap.png', 3, 'image/png', 0)",
        )
        .execute(pool)
        .await
        .unwrap();
        // Missing file + bad mime.
        sqlx::query(
            "INSERT INTO screenshots (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('s-bad', 'c1', 'f1', 'bad.pdf', 'BTCTurk/Staking/bad.pdf', 3, 'application/pdf', 0)",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_checks_classify_issues() {
        let pool = test_pool().await;
        let tmp = TempDir::new().unwrap();
        seed(&pool, tmp.path()).await;

        let report = run_checks(&pool, tmp.path()).await.unwrap();
        assert_eq!(report.screenshots_total, 4);
        assert_eq!(report.valid, 1);
        // s-orphan + s-bad missing file = 2 errors
        assert_eq!(report.errors, 2);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.infos, 1);

        // Severity sorted: errors first.
        assert_eq!(report.sample[0].severity, Severity::Error);
        assert!(report
            .sample
            .iter()
            .any(|i| i.check == "classification-gap" && i.subject.ends_with("gap.png")));
    }

    #[tokio::test]
    async fn test_fix_removes_violations_keeps_gaps() {
        let pool = test_pool().await;
        let tmp = TempDir::new().unwrap();
        seed(&pool, tmp.path()).await;

        let removed = apply_fixes(&pool).await.unwrap();
        assert_eq!(removed, 1);

        // The orphan is gone, the classification gap survives.
        let orphan: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM screenshots WHERE id = 's-orphan'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orphan, 0);
        let gap: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM screenshots WHERE id = 's-gap'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(gap, 1);
    }

    #[tokio::test]
    async fn test_unbacked_cell_is_informational() {
        let pool = test_pool().await;
        let tmp = TempDir::new().unwrap();
        sqlx::query("INSERT INTO competitors (id, name) VALUES ('c1', 'BTCTurk')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO features (id, name, category) VALUES ('f1', 'Staking', 'earn')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO competitor_features (id, competitor_id, feature_id, has_feature) VALUES ('cell1', 'c1', 'f1', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = run_checks(&pool, tmp.path()).await.unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.infos, 1);
        assert_eq!(report.sample[0].check, "unbacked-cell");

        // A justification note silences the check.
        sqlx::query("UPDATE competitor_features SET notes = 'confirmed by support docs' WHERE id = 'cell1'")
            .execute(&pool)
            .await
            .unwrap();
        let report = run_checks(&pool, tmp.path()).await.unwrap();
        assert_eq!(report.infos, 0);
    }

    #[tokio::test]
    async fn test_legacy_orphan_chain_detected() {
        let pool = test_pool().await;
        let tmp = TempDir::new().unwrap();
        // Legacy screenshot pointing at a relation that no longer exists.
        sqlx::query(
            "INSERT INTO relation_screenshots (id, competitor_feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('rs1', 'gone-cell', 'a.png', 'X/a.png', 3, 'image/png', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = run_checks(&pool, tmp.path()).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.sample[0].check, "competitor-ref");

        let removed = apply_fixes(&pool).await.unwrap();
        assert_eq!(removed, 1);
    }
}
