//! Core data types that flow through the crawl → extract → publish pipeline.
//!
//! A [`FileEntry`] is a stat snapshot taken when the walker discovers a path.
//! Extractors turn an entry into extractor-specific fields, which are merged
//! under the required core fields to form a [`MetadataRecord`]. Records are
//! grouped into sealed [`Batch`]es for publishing.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExtractionError;

/// Extracted fields keyed by name.
pub type Fields = Map<String, Value>;

/// Keys every record's `content` carries regardless of extractor.
pub mod core_fields {
    pub const PATH: &str = "path";
    pub const FILENAME: &str = "filename";
    pub const EXTENSION: &str = "extension";
    pub const SIZE_BYTES: &str = "size_bytes";
    pub const CREATED_AT: &str = "created_at";
    pub const MODIFIED_AT: &str = "modified_at";
    pub const ACCESSED_AT: &str = "accessed_at";
    pub const MIME_TYPE: &str = "mime_type";
    pub const EXTRACTOR: &str = "extractor";

    pub const ALL: [&str; 9] = [
        PATH,
        FILENAME,
        EXTENSION,
        SIZE_BYTES,
        CREATED_AT,
        MODIFIED_AT,
        ACCESSED_AT,
        MIME_TYPE,
        EXTRACTOR,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// A discovered filesystem node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path as discovered under the crawl root.
    pub path: PathBuf,
    /// Path relative to the crawl root, `/`-separated.
    pub relative: String,
    pub kind: EntryKind,
    /// Depth below the crawl root; direct children are at depth 1.
    pub depth: usize,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    /// Set when the entry was reached through a symbolic link.
    pub symlink_target: Option<PathBuf>,
}

impl FileEntry {
    /// Build an entry from already-fetched metadata.
    ///
    /// Filesystems that do not record creation time fall back to the
    /// modification time so the three timestamps are always present.
    pub fn from_metadata(
        path: PathBuf,
        relative: String,
        depth: usize,
        kind: EntryKind,
        metadata: &std::fs::Metadata,
    ) -> Self {
        let modified = metadata.modified().map(to_utc).unwrap_or_default();
        let created = metadata.created().map(to_utc).unwrap_or(modified);
        let accessed = metadata.accessed().map(to_utc).unwrap_or(modified);
        Self {
            path,
            relative,
            kind,
            depth,
            size: metadata.len(),
            created,
            modified,
            accessed,
            symlink_target: None,
        }
    }

    /// Stat `path` and build an entry relative to `root`.
    pub fn stat(root: &Path, path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        let kind = if metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let relative = relative_path(root, path);
        let depth = Path::new(&relative).components().count();
        Ok(Self::from_metadata(
            path.to_path_buf(),
            relative,
            depth,
            kind,
            &metadata,
        ))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Lower-cased extension including the leading dot, or empty.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }

    pub fn has_extension(&self, candidates: &[&str]) -> bool {
        let ext = self.extension();
        !ext.is_empty() && candidates.contains(&&ext[1..])
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

/// Render `path` relative to `root` with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Subject/visibility settings applied to every record of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTemplate {
    pub subject_prefix: String,
    pub visible_to: Vec<String>,
}

impl RecordTemplate {
    pub fn new(subject_prefix: impl Into<String>, visible_to: Vec<String>) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
            visible_to,
        }
    }

    pub fn subject_for(&self, path: &Path) -> String {
        format!("{}{}", self.subject_prefix, path.display())
    }
}

impl Default for RecordTemplate {
    fn default() -> Self {
        Self::new("file://", vec!["public".to_string()])
    }
}

/// The extraction result for one file, in the index's entry shape
/// (subject + visibility + content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub subject: String,
    pub visible_to: Vec<String>,
    pub content: Fields,
}

impl MetadataRecord {
    /// Merge extractor `fields` under the core fields for `entry`.
    ///
    /// Core keys always win: an extractor field that collides with one is
    /// dropped.
    pub fn assemble(
        entry: &FileEntry,
        mime_type: &str,
        extractor: &str,
        fields: Fields,
        template: &RecordTemplate,
    ) -> Self {
        let mut content = core_content(entry, mime_type, extractor);
        for (key, value) in fields {
            if content.contains_key(&key) {
                tracing::debug!(path = %entry.path.display(), field = %key, "dropping extractor field that shadows a core field");
                continue;
            }
            content.insert(key, value);
        }
        Self {
            subject: template.subject_for(&entry.path),
            visible_to: template.visible_to.clone(),
            content,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }
}

fn core_content(entry: &FileEntry, mime_type: &str, extractor: &str) -> Fields {
    let mut content = Map::new();
    content.insert(
        core_fields::PATH.into(),
        Value::String(entry.path.display().to_string()),
    );
    content.insert(core_fields::FILENAME.into(), Value::String(entry.file_name()));
    content.insert(core_fields::EXTENSION.into(), Value::String(entry.extension()));
    content.insert(core_fields::SIZE_BYTES.into(), Value::from(entry.size));
    content.insert(
        core_fields::CREATED_AT.into(),
        Value::String(format_timestamp(&entry.created)),
    );
    content.insert(
        core_fields::MODIFIED_AT.into(),
        Value::String(format_timestamp(&entry.modified)),
    );
    content.insert(
        core_fields::ACCESSED_AT.into(),
        Value::String(format_timestamp(&entry.accessed)),
    );
    content.insert(
        core_fields::MIME_TYPE.into(),
        Value::String(mime_type.to_string()),
    );
    content.insert(
        core_fields::EXTRACTOR.into(),
        Value::String(extractor.to_string()),
    );
    content
}

/// Why an entry produced no record without being an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    DepthExceeded { depth: usize, max_depth: usize },
    Hidden,
    Symlink,
    Excluded { pattern: String },
    NotIncluded,
    NoExtractor,
    /// Neither a regular file nor a directory (socket, fifo, device).
    SpecialFile,
}

/// Per-file result of one pass through filter → registry → extractor.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Success(MetadataRecord),
    Skipped(SkipReason),
    Failed(ExtractionError),
}

/// An ordered, size-bounded group of records destined for one publish call.
/// Immutable once sealed.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    index: usize,
    records: Vec<MetadataRecord>,
}

impl Batch {
    pub(crate) fn seal(index: usize, records: Vec<MetadataRecord>) -> Self {
        Self { index, records }
    }

    /// Position of this batch in seal order, starting at 0.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.records.iter().map(|r| r.subject.clone()).collect()
    }
}
