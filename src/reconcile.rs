//! Reconciliation pipeline orchestration.
//!
//! Runs the full pass over the screenshot tree:
//!
//! ```text
//! Scanning → Classifying → Upserting → Validating → Reporting
//! ```
//!
//! A failure while handling one file lands in the `failed` side channel
//! and the machine continues; only a missing scan root or a broken
//! database stops the run. Dry-run executes every stage but replaces each
//! mutating store call with a log line describing the would-be mutation;
//! dry-run and write mode produce an identical report shape and identical
//! counts so the two can be diffed.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::classify::{classify, Classification};
use crate::config::Config;
use crate::db;
use crate::matrix::{CellPatch, MatrixStore};
use crate::models::{NewScreenshot, ScanItem};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::resolve::{EntityResolver, ResolvedCompetitor};
use crate::scan;
use crate::screenshots::{CreateOutcome, ScreenshotStore};
use crate::validate;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scanning,
    Classifying,
    Upserting,
    Validating,
    Reporting,
    Done,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub dry_run: bool,
    pub root: Option<PathBuf>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FailedItem {
    pub path: String,
    pub stage: Stage,
    pub reason: String,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Classifying => "classifying",
            Stage::Upserting => "upserting",
            Stage::Validating => "validating",
            Stage::Reporting => "reporting",
            Stage::Done => "done",
        }
    }
}

/// Counts emitted by the Reporting stage. The shape is identical for
/// dry-run and write runs.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub scanned: u64,
    pub folder_exact: u64,
    pub folder_partial: u64,
    pub filename_keyword: u64,
    /// Files with no feature guess; left unassigned for manual review.
    pub orphaned: u64,
    pub created: u64,
    pub skipped_duplicates: u64,
    pub competitors_created: u64,
    pub failed: Vec<FailedItem>,
    pub validation: validate::ValidationReport,
}

struct ClassifiedItem {
    item: ScanItem,
    competitor: ResolvedCompetitor,
    classification: Option<Classification>,
    /// Resolved (feature_id, feature_name) when the guess maps to a
    /// seeded feature.
    feature: Option<(String, String)>,
    is_onboarding: bool,
}

pub async fn run_reconcile(
    config: &Config,
    options: &ReconcileOptions,
    progress: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<ReconcileReport> {
    let mut scan_config = config.scan.clone();
    if let Some(root) = &options.root {
        scan_config.root = root.clone();
    }

    let pool = db::connect(config).await?;
    let resolver = EntityResolver::new(&pool, &config.aliases);
    let matrix = MatrixStore::new(pool.clone());
    let store = ScreenshotStore::new(pool.clone());

    let mut report = ReconcileReport {
        dry_run: options.dry_run,
        ..ReconcileReport::default()
    };

    // ── Scanning ──
    progress.report(ProgressEvent::Scanning {
        root: scan_config.root.display().to_string(),
    });
    let mut items = scan::scan_root(&scan_config)?;
    if let Some(limit) = options.limit {
        items.truncate(limit);
    }
    report.scanned = items.len() as u64;

    // ── Classifying ──
    // Competitor resolutions are cached per run so a dry-run counts a new
    // competitor once, exactly like the write run that creates it once.
    let mut competitors: HashMap<String, ResolvedCompetitor> = HashMap::new();
    let onboarding_categories: HashMap<String, bool> = config
        .taxonomy
        .features
        .iter()
        .map(|f| (f.name.clone(), f.category.eq_ignore_ascii_case("onboarding")))
        .collect();

    let mut classified: Vec<ClassifiedItem> = Vec::new();
    for item in items {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let cache_key = resolver.canonical_name(&item.competitor_folder).to_lowercase();
        let competitor = match competitors.get(&cache_key) {
            Some(resolved) => resolved.clone(),
            None => {
                let resolved = match resolver
                    .resolve_competitor(&item.competitor_folder, options.dry_run)
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        report.failed.push(FailedItem {
                            path: item.relative_path.clone(),
                            stage: Stage::Classifying,
                            reason: format!("competitor resolution: {:#}", e),
                        });
                        continue;
                    }
                };
                if resolved.created {
                    report.competitors_created += 1;
                    if options.dry_run {
                        println!("dry-run: would create competitor '{}'", resolved.name);
                    }
                }
                competitors.insert(cache_key, resolved.clone());
                resolved
            }
        };

        let classification = classify(
            &item.relative_path,
            &item.file_name,
            &config.taxonomy.features,
        );
        let feature = match &classification {
            Some(c) => {
                match resolver.resolve_feature(&c.feature).await {
                    Ok(Some(feature)) => Some(feature),
                    Ok(None) => {
                        // Taxonomy entry without a seeded row; nothing to
                        // attach the screenshot to.
                        report.failed.push(FailedItem {
                            path: item.relative_path.clone(),
                            stage: Stage::Classifying,
                            reason: format!("feature '{}' is not seeded; run seed", c.feature),
                        });
                        continue;
                    }
                    Err(e) => {
                        report.failed.push(FailedItem {
                            path: item.relative_path.clone(),
                            stage: Stage::Classifying,
                            reason: format!("feature resolution: {:#}", e),
                        });
                        continue;
                    }
                }
            }
            None => None,
        };

        match &classification {
            Some(c) => match c.tier {
                crate::classify::Tier::FolderExact => report.folder_exact += 1,
                crate::classify::Tier::FolderPartial => report.folder_partial += 1,
                crate::classify::Tier::FilenameKeyword => report.filename_keyword += 1,
            },
            None => report.orphaned += 1,
        }

        let is_onboarding = classification
            .as_ref()
            .map(|c| onboarding_categories.get(&c.feature).copied().unwrap_or(false))
            .unwrap_or(false);

        classified.push(ClassifiedItem {
            item,
            competitor,
            classification,
            feature,
            is_onboarding,
        });
    }

    // ── Upserting ──
    // Single task in scan order: writes for the same natural key cannot
    // race. The in-run key set keeps dry-run and write counts identical
    // when one scan yields the same (competitor, file name) twice.
    let mut seen_keys: HashSet<(String, String)> = HashSet::new();
    let mut touched_competitors: HashSet<String> = HashSet::new();
    let total = classified.len() as u64;

    for (n, entry) in classified.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            eprintln!("reconcile interrupted; partial counts follow");
            break;
        }
        progress.report(ProgressEvent::Upserting {
            n: n as u64 + 1,
            total,
        });

        let key = (
            entry.competitor.name.to_lowercase(),
            entry.item.file_name.to_lowercase(),
        );
        if !seen_keys.insert(key) {
            report.skipped_duplicates += 1;
            println!(
                "skip duplicate (in scan): {}",
                entry.item.relative_path
            );
            continue;
        }

        if options.dry_run {
            let duplicate = match &entry.competitor.id {
                Some(id) => {
                    match store
                        .find_duplicate(id, &entry.item.file_name, entry.item.file_size, None)
                        .await
                    {
                        Ok(hit) => hit,
                        Err(e) => {
                            report.failed.push(FailedItem {
                                path: entry.item.relative_path.clone(),
                                stage: Stage::Upserting,
                                reason: format!("duplicate check: {:#}", e),
                            });
                            continue;
                        }
                    }
                }
                None => None,
            };
            if duplicate.is_some() {
                report.skipped_duplicates += 1;
                println!("skip duplicate: {}", entry.item.relative_path);
            } else {
                report.created += 1;
                println!(
                    "dry-run: would create screenshot {} ({})",
                    entry.item.relative_path,
                    entry
                        .classification
                        .as_ref()
                        .map(|c| c.tier.as_str())
                        .unwrap_or("unclassified")
                );
                if let Some((_, feature_name)) = &entry.feature {
                    println!(
                        "dry-run: would upsert cell ({}, {}) has_feature=true",
                        entry.competitor.name, feature_name
                    );
                }
            }
            touched_competitors.insert(entry.competitor.name.clone());
            continue;
        }

        let competitor_id = match &entry.competitor.id {
            Some(id) => id.clone(),
            // Unreachable in write mode; resolution always yields an id.
            None => continue,
        };

        let new = NewScreenshot {
            competitor_id: competitor_id.clone(),
            feature_id: entry.feature.as_ref().map(|(id, _)| id.clone()),
            file_name: entry.item.file_name.clone(),
            file_path: entry.item.relative_path.clone(),
            file_size: entry.item.file_size,
            mime_type: entry.item.mime_type.clone(),
            is_onboarding: entry.is_onboarding,
            upload_source: "reconciler".to_string(),
            context: None,
            classify_method: entry.classification.as_ref().map(|c| c.tier.as_str().to_string()),
            classify_confidence: entry.classification.as_ref().map(|c| c.tier.confidence()),
        };

        match store.create(&new).await {
            Ok(CreateOutcome::Created(_)) => {
                report.created += 1;
                if let Some((feature_id, _)) = &entry.feature {
                    if let Err(e) = matrix
                        .upsert_cell(&competitor_id, feature_id, CellPatch::attach_screenshot())
                        .await
                    {
                        report.failed.push(FailedItem {
                            path: entry.item.relative_path.clone(),
                            stage: Stage::Upserting,
                            reason: format!("matrix upsert: {:#}", e),
                        });
                    }
                }
            }
            Ok(CreateOutcome::SkippedDuplicate(_)) => {
                report.skipped_duplicates += 1;
                println!("skip duplicate: {}", entry.item.relative_path);
            }
            Err(e) => {
                report.failed.push(FailedItem {
                    path: entry.item.relative_path.clone(),
                    stage: Stage::Upserting,
                    reason: format!("screenshot create: {:#}", e),
                });
            }
        }
        touched_competitors.insert(competitor_id);
    }

    // Derived competitor descriptions are recomputed once per touched
    // competitor, not per file.
    if options.dry_run {
        for name in &touched_competitors {
            println!("dry-run: would recompute coverage for '{}'", name);
        }
    } else {
        for competitor_id in &touched_competitors {
            if let Err(e) = matrix
                .recompute_coverage(competitor_id, &config.taxonomy.industry)
                .await
            {
                report.failed.push(FailedItem {
                    path: competitor_id.clone(),
                    stage: Stage::Upserting,
                    reason: format!("coverage recompute: {:#}", e),
                });
            }
        }
    }

    // ── Validating ──
    report.validation = validate::run_checks(&pool, &scan_config.root).await?;

    // ── Reporting ──
    print_report(&scan_config.root.display().to_string(), &report);

    pool.close().await;
    Ok(report)
}

fn print_report(root: &str, report: &ReconcileReport) {
    if report.dry_run {
        println!("reconcile {} (dry-run)", root);
    } else {
        println!("reconcile {}", root);
    }
    println!("  scanned: {} files", report.scanned);
    println!(
        "  classified: {} folder-exact, {} folder-partial, {} filename-keyword",
        report.folder_exact, report.folder_partial, report.filename_keyword
    );
    println!("  orphaned: {}", report.orphaned);
    println!("  created: {} screenshots", report.created);
    println!("  skipped duplicates: {}", report.skipped_duplicates);
    println!("  competitors created: {}", report.competitors_created);
    println!("  failed: {}", report.failed.len());
    for item in &report.failed {
        println!("    [{}] {}: {}", item.stage.as_str(), item.path, item.reason);
    }
    println!("  {}", report.validation.summary_line());
    println!("ok");
}

/// CLI entry for `shotsync reconcile`.
pub async fn run(
    config: &Config,
    options: ReconcileOptions,
    progress: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<()> {
    run_reconcile(config, &options, progress, cancel).await?;
    Ok(())
}
