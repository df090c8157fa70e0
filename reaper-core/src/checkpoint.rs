// Durable batch progress markers

use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "checkpoint_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Index of the last page that was fully processed, success or failure.
    pub last_processed_index: usize,
    pub total_records_collected: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Running batch counters carried into a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_records: usize,
}

impl Checkpoint {
    pub fn new(last_processed_index: usize, stats: &BatchStats) -> Self {
        Self {
            last_processed_index,
            total_records_collected: stats.total_records,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            timestamp: Utc::now(),
        }
    }

    /// Index the batch continues from.
    pub fn next_index(&self) -> usize {
        self.last_processed_index + 1
    }
}

/// Directory of `checkpoint_<index>.json` files.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}{}.json", FILE_PREFIX, index))
    }

    /// Persist a checkpoint for `index`. The file is written beside its final
    /// name and renamed into place so a crash never leaves a torn checkpoint.
    pub fn save(&self, index: usize, stats: &BatchStats) -> Result<Checkpoint> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| BatchError::persistence(format!("checkpoint dir {}", self.dir.display()), e))?;

        let checkpoint = Checkpoint::new(index, stats);
        let body = serde_json::to_string_pretty(&checkpoint)?;

        let path = self.path_for(index);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .map_err(|e| BatchError::persistence(format!("checkpoint {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| BatchError::persistence(format!("checkpoint {}", path.display()), e))?;

        info!("Checkpoint saved: {} pages processed", index + 1);
        Ok(checkpoint)
    }

    /// The checkpoint with the greatest `last_processed_index`.
    ///
    /// Selection reads every file's content; file names and modification
    /// times are not trusted. Unreadable files are skipped.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<Checkpoint> = None;
        for entry in entries {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"));
            if !is_checkpoint {
                continue;
            }

            match Self::read(&path) {
                Ok(checkpoint) => {
                    if latest
                        .as_ref()
                        .is_none_or(|l| checkpoint.last_processed_index > l.last_processed_index)
                    {
                        latest = Some(checkpoint);
                    }
                }
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }

        if let Some(ref checkpoint) = latest {
            debug!(
                "Latest checkpoint in {}: index {}",
                self.dir.display(),
                checkpoint.last_processed_index
            );
        }
        Ok(latest)
    }

    fn read(path: &Path) -> Result<Checkpoint> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
