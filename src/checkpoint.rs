//! Durable push progress checkpoint.
//!
//! Maps each local file path to its last push outcome so a long remote
//! sync can resume after an interruption without re-uploading confirmed
//! files. Every update rewrites the whole file through a temp file and
//! rename, guarded by a lock file for the duration of the write. The
//! checkpoint is the only state shared across process restarts.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOutcome {
    pub status: PushStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub updated_at: i64,
}

impl PushOutcome {
    pub fn completed(remote_id: Option<String>) -> Self {
        Self {
            status: PushStatus::Completed,
            reason: None,
            remote_id,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: PushStatus::Failed,
            reason: Some(reason.into()),
            remote_id: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    entries: BTreeMap<String, PushOutcome>,
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn get(&self, file_path: &str) -> Option<&PushOutcome> {
        self.entries.get(file_path)
    }

    pub fn is_completed(&self, file_path: &str) -> bool {
        matches!(
            self.entries.get(file_path),
            Some(outcome) if outcome.status == PushStatus::Completed
        )
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, o)| o.status == PushStatus::Failed)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Record an outcome and persist immediately, so a crash after this
    /// call loses at most nothing.
    pub fn record(&mut self, file_path: &str, outcome: PushOutcome) -> Result<()> {
        self.entries.insert(file_path.to_string(), outcome);
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _lock = LockFile::acquire(&self.lock_path())?;

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write checkpoint: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }
}

/// Exclusive advisory lock held for the duration of a checkpoint write.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path) -> Result<Self> {
        for _ in 0..50 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
        bail!("checkpoint lock held too long: {}", path.display());
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("progress.json");

        let mut checkpoint = Checkpoint::load(&path).unwrap();
        checkpoint
            .record(
                "BTCTurk/Staking/a.png",
                PushOutcome::completed(Some("remote-1".to_string())),
            )
            .unwrap();
        checkpoint
            .record("BTCTurk/Staking/b.png", PushOutcome::failed("timed out"))
            .unwrap();

        let reloaded = Checkpoint::load(&path).unwrap();
        assert!(reloaded.is_completed("BTCTurk/Staking/a.png"));
        assert!(!reloaded.is_completed("BTCTurk/Staking/b.png"));
        assert_eq!(
            reloaded.get("BTCTurk/Staking/a.png").unwrap().remote_id.as_deref(),
            Some("remote-1")
        );
        assert_eq!(reloaded.failed_paths(), vec!["BTCTurk/Staking/b.png"]);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let checkpoint = Checkpoint::load(&tmp.path().join("none.json")).unwrap();
        assert!(checkpoint.failed_paths().is_empty());
        assert!(!checkpoint.is_completed("anything"));
    }

    #[test]
    fn test_no_partial_writes_left_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("progress.json");
        let mut checkpoint = Checkpoint::load(&path).unwrap();
        checkpoint
            .record("a.png", PushOutcome::completed(None))
            .unwrap();

        // Neither the temp file nor the lock survives a save.
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!path.with_extension("json.lock").exists());
    }

    #[test]
    fn test_failed_entry_overwritten_on_retry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("progress.json");
        let mut checkpoint = Checkpoint::load(&path).unwrap();
        checkpoint
            .record("a.png", PushOutcome::failed("network error"))
            .unwrap();
        checkpoint
            .record("a.png", PushOutcome::completed(Some("r9".to_string())))
            .unwrap();

        assert!(checkpoint.is_completed("a.png"));
        assert!(checkpoint.failed_paths().is_empty());
    }
}
