//! Re-run the classifier over stored screenshots with no feature.
//!
//! Classification gaps accumulate when files land before their keywords
//! exist in the taxonomy. `reclassify` walks the stored records (both
//! representations), reapplies the classifier to the stored paths, and
//! assigns features for new hits. Determinism rules are the classifier's;
//! nothing here ever unassigns a feature. With `--remote`, records whose
//! push checkpoint knows a remote id also get their remote classification
//! updated.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::checkpoint::Checkpoint;
use crate::classify::classify;
use crate::config::Config;
use crate::db;
use crate::matrix::{CellPatch, MatrixStore};
use crate::models::{Feature, Priority};
use crate::remote::RemoteSyncClient;
use crate::screenshots::{ScreenshotFilter, ScreenshotStore};

pub async fn run_reclassify(config: &Config, dry_run: bool, remote: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ScreenshotStore::new(pool.clone());
    let matrix = MatrixStore::new(pool.clone());

    let feature_rows: Vec<(String, String, String, String, Option<String>)> =
        sqlx::query_as("SELECT id, name, category, priority, description FROM features")
            .fetch_all(&pool)
            .await?;
    let features: Vec<Feature> = feature_rows
        .into_iter()
        .map(|(id, name, category, priority, description)| Feature {
            id,
            name,
            category,
            priority: Priority::parse(&priority).unwrap_or_default(),
            description,
        })
        .collect();
    let feature_ids: HashMap<String, String> = features
        .iter()
        .map(|f| (f.name.clone(), f.id.clone()))
        .collect();

    let remote_client = if remote {
        let remote_config = config
            .remote
            .as_ref()
            .context("--remote requires a [remote] section")?;
        Some((
            RemoteSyncClient::new(remote_config)?,
            Checkpoint::load(&remote_config.checkpoint_path)?,
        ))
    } else {
        None
    };
    let remote_features: HashMap<String, String> = match &remote_client {
        Some((client, _)) => client
            .fetch_features()
            .await?
            .into_iter()
            .map(|f| (f.name.to_lowercase(), f.id))
            .collect(),
        None => HashMap::new(),
    };

    let unclassified = store
        .list_all(&ScreenshotFilter {
            unclassified_only: true,
            ..ScreenshotFilter::default()
        })
        .await?;

    let mut assigned = 0u64;
    let mut still_unclassified = 0u64;
    let mut remote_updated = 0u64;
    let mut failed = 0u64;
    let mut touched: Vec<String> = Vec::new();

    for shot in &unclassified {
        let classification = classify(&shot.file_path, &shot.file_name, &config.taxonomy.features);
        let classification = match classification {
            Some(c) => c,
            None => {
                still_unclassified += 1;
                continue;
            }
        };
        let feature_id = match feature_ids.get(&classification.feature) {
            Some(id) => id.clone(),
            None => {
                println!(
                    "  feature '{}' is not seeded; skipping {}",
                    classification.feature, shot.file_path
                );
                failed += 1;
                continue;
            }
        };

        if dry_run {
            println!(
                "dry-run: would assign '{}' ({}) to {}",
                classification.feature,
                classification.tier.as_str(),
                shot.file_path
            );
            assigned += 1;
            continue;
        }

        match store.reassign_feature(&shot.id, Some(&feature_id)).await {
            Ok(true) => {
                assigned += 1;
                matrix
                    .upsert_cell(&shot.competitor_id, &feature_id, CellPatch::attach_screenshot())
                    .await?;
                if !touched.contains(&shot.competitor_id) {
                    touched.push(shot.competitor_id.clone());
                }

                if let Some((client, checkpoint)) = &remote_client {
                    let remote_id = checkpoint
                        .get(&shot.file_path)
                        .and_then(|o| o.remote_id.clone());
                    let remote_feature = remote_features.get(&classification.feature.to_lowercase());
                    if let (Some(remote_id), Some(remote_feature)) = (remote_id, remote_feature) {
                        match client
                            .reassign_feature(&remote_id, Some(remote_feature))
                            .await
                        {
                            Ok(()) => remote_updated += 1,
                            Err(e) => {
                                println!("  remote update failed for {}: {:#}", shot.file_path, e);
                                failed += 1;
                            }
                        }
                    }
                }
            }
            Ok(false) => failed += 1,
            Err(e) => {
                println!("  reassign failed for {}: {:#}", shot.file_path, e);
                failed += 1;
            }
        }
    }

    if !dry_run {
        for competitor_id in &touched {
            matrix
                .recompute_coverage(competitor_id, &config.taxonomy.industry)
                .await?;
        }
    }

    if dry_run {
        println!("reclassify (dry-run)");
    } else {
        println!("reclassify");
    }
    println!("  candidates: {}", unclassified.len());
    println!("  assigned: {}", assigned);
    println!("  still unclassified: {}", still_unclassified);
    if remote {
        println!("  remote updated: {}", remote_updated);
    }
    println!("  failed: {}", failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
