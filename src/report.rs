//! The result of one crawl invocation.
//!
//! A [`RunReport`] is built by the crawler's single recording task and is
//! read-only once handed back. Partial failure is data, not an error: the
//! caller inspects [`RunCounts`], the per-file [`FileOutcome`]s, and the
//! per-batch [`BatchReport`]s to decide what counts as a failed run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, PublishError};
use crate::models::{ExtractionOutcome, FileEntry, MetadataRecord, SkipReason};
use crate::publish::PublishResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The walk was exhausted.
    Completed,
    /// A cancellation signal stopped the walk early.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Skipped,
    Failed,
}

/// What happened to one visited file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExtractionError>,
}

impl FileOutcome {
    pub fn new(path: &Path, outcome: &ExtractionOutcome) -> Self {
        let mut out = Self {
            path: path.to_path_buf(),
            kind: OutcomeKind::Success,
            subject: None,
            extractor: None,
            skip_reason: None,
            error: None,
        };
        match outcome {
            ExtractionOutcome::Success(record) => {
                out.subject = Some(record.subject.clone());
                out.extractor = record
                    .get(crate::models::core_fields::EXTRACTOR)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
            ExtractionOutcome::Skipped(reason) => {
                out.kind = OutcomeKind::Skipped;
                out.skip_reason = Some(reason.clone());
            }
            ExtractionOutcome::Failed(error) => {
                out.kind = OutcomeKind::Failed;
                out.error = Some(error.clone());
            }
        }
        out
    }
}

/// Publish outcome for one sealed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub size: usize,
    /// False when no publisher was configured or publishing had halted.
    pub submitted: bool,
    pub attempts: u32,
    pub accepted: usize,
    pub rejected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PublishError>,
}

impl BatchReport {
    pub fn from_result(size: usize, result: PublishResult) -> Self {
        Self {
            index: result.batch,
            size,
            submitted: true,
            attempts: result.attempts,
            accepted: result.accepted.len(),
            rejected: result.rejected,
            task_id: result.task_id,
            error: result.error,
        }
    }

    pub fn not_submitted(index: usize, size: usize) -> Self {
        Self {
            index,
            size,
            submitted: false,
            attempts: 0,
            accepted: 0,
            rejected: Vec::new(),
            task_id: None,
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Files that reached the recorder (success + skipped + failed).
    pub visited: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Directories rejected by the filter; their contents were not walked.
    pub pruned_dirs: usize,
    pub walk_errors: usize,
    pub batches: usize,
    pub batched_records: usize,
    pub published_records: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    root: PathBuf,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    counts: RunCounts,
    outcomes: Vec<FileOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    records: Vec<MetadataRecord>,
    batches: Vec<BatchReport>,
    walk_errors: Vec<String>,
}

impl RunReport {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    /// One entry per visited file, sorted by path.
    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Produced records, only kept when `crawler.keep_records` is set.
    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn batches(&self) -> &[BatchReport] {
        &self.batches
    }

    pub fn walk_errors(&self) -> &[String] {
        &self.walk_errors
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.kind == OutcomeKind::Failed)
    }

    /// Subjects of every successful file, sorted.
    pub fn subjects(&self) -> Vec<&str> {
        let mut subjects: Vec<&str> = self
            .outcomes
            .iter()
            .filter_map(|o| o.subject.as_deref())
            .collect();
        subjects.sort_unstable();
        subjects
    }

    pub fn outcome_for(&self, path: &Path) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.path == path)
    }

    /// The authentication failure that stopped publishing, if any.
    pub fn fatal_publish_error(&self) -> Option<&PublishError> {
        self.batches
            .iter()
            .filter_map(|b| b.error.as_ref())
            .find(|e| e.is_auth_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed
            && self.counts.failed == 0
            && self.counts.failed_batches == 0
            && self.counts.walk_errors == 0
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(())
    }
}

/// Accumulates a report. Owned by exactly one task.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    root: PathBuf,
    started_at: DateTime<Utc>,
    keep_records: bool,
    outcomes: Vec<FileOutcome>,
    records: Vec<MetadataRecord>,
    batches: Vec<BatchReport>,
    walk_errors: Vec<String>,
    pruned_dirs: usize,
    succeeded: usize,
    skipped: usize,
    failed: usize,
}

impl ReportBuilder {
    pub(crate) fn new(root: &Path, keep_records: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            started_at: Utc::now(),
            keep_records,
            outcomes: Vec::new(),
            records: Vec::new(),
            batches: Vec::new(),
            walk_errors: Vec::new(),
            pruned_dirs: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Append the outcome for `entry`, handing back the record on success
    /// so the caller can batch it.
    pub(crate) fn record(
        &mut self,
        entry: &FileEntry,
        outcome: ExtractionOutcome,
    ) -> Option<MetadataRecord> {
        self.outcomes.push(FileOutcome::new(&entry.path, &outcome));
        match outcome {
            ExtractionOutcome::Success(record) => {
                self.succeeded += 1;
                if self.keep_records {
                    self.records.push(record.clone());
                }
                Some(record)
            }
            ExtractionOutcome::Skipped(_) => {
                self.skipped += 1;
                None
            }
            ExtractionOutcome::Failed(_) => {
                self.failed += 1;
                None
            }
        }
    }

    pub(crate) fn pruned(&mut self) {
        self.pruned_dirs += 1;
    }

    pub(crate) fn walk_error(&mut self, message: String) {
        self.walk_errors.push(message);
    }

    pub(crate) fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed
    }

    pub(crate) fn finish(mut self, status: RunStatus, mut batches: Vec<BatchReport>) -> RunReport {
        self.outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        self.records.sort_by(|a, b| a.subject.cmp(&b.subject));
        batches.sort_by_key(|b| b.index);
        self.batches = batches;

        let counts = RunCounts {
            visited: self.outcomes.len(),
            succeeded: self.succeeded,
            skipped: self.skipped,
            failed: self.failed,
            pruned_dirs: self.pruned_dirs,
            walk_errors: self.walk_errors.len(),
            batches: self.batches.len(),
            batched_records: self.batches.iter().map(|b| b.size).sum(),
            published_records: self.batches.iter().map(|b| b.accepted).sum(),
            failed_batches: self.batches.iter().filter(|b| b.is_failure()).count(),
        };
        RunReport {
            root: self.root,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            counts,
            outcomes: self.outcomes,
            records: self.records,
            batches: self.batches,
            walk_errors: self.walk_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;
    use crate::extract::test_support::entry_for;
    use crate::models::{Fields, RecordTemplate};

    fn success(entry: &FileEntry) -> ExtractionOutcome {
        ExtractionOutcome::Success(MetadataRecord::assemble(
            entry,
            "text/plain",
            "text",
            Fields::new(),
            &RecordTemplate::default(),
        ))
    }

    #[test]
    fn counts_and_sorted_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.txt");
        let a = dir.path().join("a.txt");
        let c = dir.path().join("c.bin");
        for p in [&a, &b, &c] {
            std::fs::write(p, "x").unwrap();
        }

        let mut builder = ReportBuilder::new(dir.path(), true);
        let eb = entry_for(&b);
        assert!(builder.record(&eb, success(&eb)).is_some());
        let ea = entry_for(&a);
        builder.record(&ea, success(&ea));
        builder.record(
            &entry_for(&c),
            ExtractionOutcome::Failed(ExtractionError::corrupt(&c, "bad")),
        );
        builder.pruned();

        let report = builder.finish(RunStatus::Completed, Vec::new());
        assert_eq!(report.counts().succeeded, 2);
        assert_eq!(report.counts().failed, 1);
        assert_eq!(report.counts().pruned_dirs, 1);
        assert_eq!(report.outcomes()[0].path, a);
        assert_eq!(report.records().len(), 2);
        let failure = report.failures().next().unwrap();
        assert_eq!(
            failure.error.as_ref().unwrap().kind,
            ExtractionErrorKind::Corrupt
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn auth_failure_is_fatal_publish_error() {
        let builder = ReportBuilder::new(Path::new("/r"), false);
        let mut failed = BatchReport::not_submitted(0, 3);
        failed.submitted = true;
        failed.error = Some(PublishError::AuthFailure {
            status: 401,
            message: "expired".into(),
        });
        let report = builder.finish(
            RunStatus::Completed,
            vec![BatchReport::not_submitted(1, 2), failed],
        );
        assert_eq!(report.batches()[0].index, 0);
        assert!(report.fatal_publish_error().unwrap().is_auth_failure());
        assert_eq!(report.counts().failed_batches, 1);
        assert_eq!(report.counts().batched_records, 5);
    }

    #[test]
    fn write_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportBuilder::new(dir.path(), false).finish(RunStatus::Cancelled, Vec::new());
        let out = dir.path().join("report.json");
        report.write_json(&out).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(value["status"], "cancelled");
        assert_eq!(value["counts"]["visited"], 0);
    }
}
