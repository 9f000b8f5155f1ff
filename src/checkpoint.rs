//! Durable sweep checkpoint.
//!
//! A single JSON file `{"last_request": <ISO-8601 | null>}` holds the lower
//! bound for "new" posts in the next sweep. The file is created with the
//! current time when absent and rewritten atomically (temp file + rename)
//! after each completed sweep.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_request: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored timestamp, initializing the file to `now` when the file
    /// is absent or holds a null value.
    pub fn load_or_init(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.path.exists() {
            let content = fs::read_to_string(&self.path)
                .with_context(|| format!("failed to read {}", self.path.display()))?;
            let parsed: CheckpointFile =
                serde_json::from_str(&content).context("invalid checkpoint file")?;
            if let Some(ts) = parsed.last_request {
                return Ok(ts);
            }
        }
        self.advance(now)?;
        Ok(now)
    }

    /// Persist `ts` as the next sweep's lower bound.
    pub fn advance(&self, ts: DateTime<Utc>) -> Result<()> {
        let content = serde_json::to_string_pretty(&CheckpointFile { last_request: Some(ts) })?;
        write_atomically(&self.path, &content)
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
