//! Resumable remote push.
//!
//! Mirrors local screenshots to the remote deployment, one file at a
//! time. The remote is listed once up front; each local file is then
//! checked against that index by owning competitor and byte size before
//! any upload. Progress is checkpointed after every item, so an
//! interrupted run resumes where it left off, and a file already marked
//! completed is skipped with zero network calls. One file's failure
//! never aborts the run; the summary enumerates exactly what failed and
//! why so a `--retry-failed` rerun can pick those up.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::checkpoint::{Checkpoint, PushOutcome};
use crate::config::Config;
use crate::db;
use crate::models::Screenshot;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::remote::{RemoteScreenshot, RemoteSyncClient};
use crate::resolve::EntityResolver;
use crate::screenshots::{ScreenshotFilter, ScreenshotStore};

#[derive(Debug, Default)]
struct PushSummary {
    candidates: u64,
    uploaded: u64,
    restored: u64,
    already_present: u64,
    skipped_checkpoint: u64,
    failed: Vec<(String, String)>,
}

enum PushResult {
    Uploaded(String),
    Restored(String),
    AlreadyPresent(String),
}

pub async fn run_push(
    config: &Config,
    limit: Option<usize>,
    retry_failed: bool,
    progress: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<()> {
    let remote_config = config
        .remote
        .as_ref()
        .context("remote is not configured; add a [remote] section")?;
    let client = RemoteSyncClient::new(remote_config)?;

    let pool = db::connect(config).await?;
    let store = ScreenshotStore::new(pool.clone());
    let resolver = EntityResolver::new(&pool, &config.aliases);

    // An unreachable remote at startup is fatal; per-file trouble later is not.
    let remote_competitors = client
        .fetch_competitors()
        .await
        .context("remote is unreachable")?;
    let remote_features = client.fetch_features().await?;
    let remote_shots = client.fetch_screenshots(remote_config.list_limit).await?;

    // Index the remote: competitor name (canonicalized) -> id, and
    // screenshots grouped per remote competitor.
    let mut competitor_ids: HashMap<String, String> = HashMap::new();
    for competitor in &remote_competitors {
        let canonical = resolver.canonical_name(&competitor.name).to_lowercase();
        competitor_ids.insert(canonical, competitor.id.clone());
    }
    let mut feature_ids: HashMap<String, String> = HashMap::new();
    for feature in &remote_features {
        feature_ids.insert(feature.name.to_lowercase(), feature.id.clone());
    }
    let mut shots_by_competitor: HashMap<String, Vec<RemoteScreenshot>> = HashMap::new();
    for shot in remote_shots {
        shots_by_competitor
            .entry(shot.competitor_id.clone())
            .or_default()
            .push(shot);
    }

    // Local name maps for translating ids to names the remote understands.
    let local_competitors: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT id, name FROM competitors")
            .fetch_all(&pool)
            .await?
            .into_iter()
            .collect();
    let local_features: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT id, name FROM features")
            .fetch_all(&pool)
            .await?
            .into_iter()
            .collect();

    let mut checkpoint = Checkpoint::load(&remote_config.checkpoint_path)?;

    let locals = store.list_all(&ScreenshotFilter::default()).await?;
    let locals_total = locals.len();
    let mut candidates: Vec<Screenshot> = if retry_failed {
        let failed: std::collections::HashSet<String> =
            checkpoint.failed_paths().into_iter().collect();
        locals
            .into_iter()
            .filter(|s| failed.contains(&s.file_path))
            .collect()
    } else {
        locals
            .into_iter()
            .filter(|s| !checkpoint.is_completed(&s.file_path))
            .collect()
    };
    let skipped_checkpoint = if retry_failed {
        0
    } else {
        (locals_total - candidates.len()) as u64
    };
    if let Some(limit) = limit {
        candidates.truncate(limit);
    }

    let mut summary = PushSummary {
        candidates: candidates.len() as u64,
        skipped_checkpoint,
        ..PushSummary::default()
    };
    let total = candidates.len() as u64;

    for (n, shot) in candidates.iter().enumerate() {
        // Cooperative cancellation, checked between items. The checkpoint
        // is already flushed per item, so stopping here loses nothing.
        if cancel.load(Ordering::SeqCst) {
            eprintln!("push interrupted; checkpoint is current, rerun to resume");
            break;
        }
        progress.report(ProgressEvent::Pushing {
            n: n as u64 + 1,
            total,
        });

        // Completed entries cost zero network calls.
        if checkpoint.is_completed(&shot.file_path) {
            summary.skipped_checkpoint += 1;
            continue;
        }

        let result = push_one(
            config,
            &client,
            shot,
            &local_competitors,
            &local_features,
            &competitor_ids,
            &feature_ids,
            &shots_by_competitor,
            remote_config.size_tolerance_bytes,
        )
        .await;

        match result {
            Ok(PushResult::Uploaded(remote_id)) => {
                summary.uploaded += 1;
                checkpoint.record(&shot.file_path, PushOutcome::completed(Some(remote_id)))?;
            }
            Ok(PushResult::Restored(remote_id)) => {
                summary.restored += 1;
                checkpoint.record(&shot.file_path, PushOutcome::completed(Some(remote_id)))?;
            }
            Ok(PushResult::AlreadyPresent(remote_id)) => {
                summary.already_present += 1;
                checkpoint.record(&shot.file_path, PushOutcome::completed(Some(remote_id)))?;
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                summary.failed.push((shot.file_path.clone(), reason.clone()));
                checkpoint.record(&shot.file_path, PushOutcome::failed(reason))?;
            }
        }
    }

    println!("push {}", remote_config.base_url);
    println!("  candidates: {}", summary.candidates);
    println!(
        "  uploaded: {}, restored: {}, already present: {}",
        summary.uploaded, summary.restored, summary.already_present
    );
    println!("  skipped (checkpoint): {}", summary.skipped_checkpoint);
    println!("  failed: {}", summary.failed.len());
    for (path, reason) in &summary.failed {
        println!("    {}: {}", path, reason);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn push_one(
    config: &Config,
    client: &RemoteSyncClient,
    shot: &Screenshot,
    local_competitors: &HashMap<String, String>,
    local_features: &HashMap<String, String>,
    competitor_ids: &HashMap<String, String>,
    feature_ids: &HashMap<String, String>,
    shots_by_competitor: &HashMap<String, Vec<RemoteScreenshot>>,
    size_tolerance: i64,
) -> Result<PushResult> {
    let competitor_name = local_competitors
        .get(&shot.competitor_id)
        .context("local competitor reference is broken; run validate --fix")?;
    let remote_competitor_id = competitor_ids
        .get(&competitor_name.to_lowercase())
        .with_context(|| format!("competitor '{}' does not exist on remote", competitor_name))?;

    let remote_feature_id = shot
        .feature_id
        .as_ref()
        .and_then(|id| local_features.get(id))
        .and_then(|name| feature_ids.get(&name.to_lowercase()))
        .map(String::as_str);

    // Existence check by file name or byte size within tolerance; the
    // remote may have re-encoded the file.
    let existing = shots_by_competitor
        .get(remote_competitor_id)
        .and_then(|shots| {
            shots.iter().find(|r| {
                r.file_name == shot.file_name
                    || (r.file_size - shot.file_size).abs() <= size_tolerance
            })
        });

    if let Some(existing) = existing {
        let blob_ok = match &existing.url {
            Some(url) => client.blob_available(url).await?,
            // No direct URL to probe; trust the record.
            None => true,
        };
        if blob_ok {
            return Ok(PushResult::AlreadyPresent(existing.id.clone()));
        }
        // Row exists but the blob is gone: restore instead of creating a
        // second record for the same logical asset.
        let bytes = read_local_file(config, &shot.file_path)?;
        let restored = client
            .upload_screenshot(
                true,
                &bytes,
                &shot.file_name,
                &shot.mime_type,
                remote_competitor_id,
                remote_feature_id,
            )
            .await?;
        return Ok(PushResult::Restored(restored.id));
    }

    let bytes = read_local_file(config, &shot.file_path)?;
    let uploaded = client
        .upload_screenshot(
            false,
            &bytes,
            &shot.file_name,
            &shot.mime_type,
            remote_competitor_id,
            remote_feature_id,
        )
        .await?;
    Ok(PushResult::Uploaded(uploaded.id))
}

fn read_local_file(config: &Config, file_path: &str) -> Result<Vec<u8>> {
    let full = config.scan.root.join(file_path);
    std::fs::read(&full).with_context(|| format!("failed to read {}", full.display()))
}
