//! Local JSON copies of produced records.
//!
//! Each record is written to `<dir>/<sha256(subject)>.json`. This is a side
//! channel: a failed write is logged and never changes a file's outcome.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::models::MetadataRecord;

#[derive(Debug, Clone)]
pub struct JsonRecordWriter {
    dir: PathBuf,
}

impl JsonRecordWriter {
    /// Create the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create metadata directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, subject: &str) -> PathBuf {
        let digest = Sha256::digest(subject.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Serialize `record` and write it through `tokio::fs`, off the
    /// runtime's worker threads.
    pub async fn save(&self, record: &MetadataRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.subject);
        let json = serde_json::to_string_pretty(record)
            .with_context(|| format!("Failed to serialize record {}", record.subject))?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Like [`save`](Self::save), logging instead of returning errors.
    pub async fn save_or_warn(&self, record: &MetadataRecord) {
        if let Err(e) = self.save(record).await {
            tracing::warn!(subject = %record.subject, error = %format!("{e:#}"), "failed to save record JSON");
        }
    }
}
