//! Error types for the crawl, extract, and publish stages.
//!
//! Each stage has its own error type so callers can tell a per-file failure
//! (recorded in the [`RunReport`](crate::report::RunReport), walk continues)
//! from a per-batch failure (recorded, other batches continue) and from the
//! few conditions that end a run outright ([`CrawlError`]).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single file could not be turned into a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// The file could not be opened or read.
    Unreadable,
    /// The bytes do not form a valid instance of the detected format.
    Corrupt,
    /// The format is recognised but this variant of it is not supported.
    UnsupportedSubformat,
    /// Extraction did not finish within the configured time limit.
    Timeout,
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionErrorKind::Unreadable => "unreadable",
            ExtractionErrorKind::Corrupt => "corrupt",
            ExtractionErrorKind::UnsupportedSubformat => "unsupported subformat",
            ExtractionErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Per-file extraction failure.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} file {}: {message}", path.display())]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub path: PathBuf,
    pub message: String,
}

impl ExtractionError {
    pub fn new(
        kind: ExtractionErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// An I/O failure while reading the file.
    pub fn unreadable(path: &Path, source: &std::io::Error) -> Self {
        Self::new(ExtractionErrorKind::Unreadable, path, source.to_string())
    }

    pub fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::Corrupt, path, message)
    }

    pub fn unsupported(path: &Path, message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::UnsupportedSubformat, path, message)
    }

    pub fn timeout(path: &Path, secs: u64) -> Self {
        Self::new(
            ExtractionErrorKind::Timeout,
            path,
            format!("extraction exceeded {}s", secs),
        )
    }
}

/// Failure talking to the remote search index.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishError {
    /// Network error, rate limit, or server error that survived every retry.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// The index refused the submission. `subjects` lists the offending
    /// records when the response identifies them; empty otherwise.
    #[error("rejected by index (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        subjects: Vec<String>,
    },

    /// The bearer credential was missing, expired, or lacks permission.
    #[error("authentication failed (HTTP {status}): {message}")]
    AuthFailure { status: u16, message: String },

    /// No entry exists for the requested subject.
    #[error("no entry for subject {subject}")]
    NotFound { subject: String },

    /// The request or response body could not be encoded/decoded.
    #[error("encoding error: {message}")]
    Encode { message: String },
}

impl PublishError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, PublishError::AuthFailure { .. })
    }
}

/// Conditions that abort a crawl before or instead of producing a report.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("crawl root does not exist: {path}")]
    RootNotFound { path: PathBuf },

    #[error("crawl root is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CrawlError {
    /// Create an I/O error for the crawl root, mapping `NotFound`.
    pub fn root_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::RootNotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_maps_to_unreadable() {
        let err = ExtractionError::unreadable(
            Path::new("/data/a.txt"),
            &std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind, ExtractionErrorKind::Unreadable);
        assert!(err.to_string().contains("/data/a.txt"));
    }

    #[test]
    fn root_not_found_is_distinguished() {
        let err = CrawlError::root_io(
            "/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, CrawlError::RootNotFound { .. }));
    }

    #[test]
    fn publish_error_serializes_with_kind_tag() {
        let err = PublishError::Transient {
            attempts: 3,
            message: "503".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "transient");
        assert_eq!(json["attempts"], 3);
        assert!(err.is_transient());
    }
}
