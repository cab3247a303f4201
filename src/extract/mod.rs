//! Format-specific metadata extraction.
//!
//! An [`Extractor`] decides from a cheap [`Sniff`] (extension plus the first
//! few hundred bytes) whether it can handle a file, then produces the
//! additive fields for that file's record. The [`ExtractorRegistry`] picks
//! the first capable extractor: user-registered ones in registration order,
//! then the built-ins in a fixed priority order with the generic fallback
//! last.
//!
//! | Extractor | Formats | Fields |
//! |-----------|---------|--------|
//! | [`PdfExtractor`] | `.pdf` | page count, info dictionary, text preview |
//! | [`ImageExtractor`] | png, jpeg, gif, bmp, tiff, webp | dimensions, color mode, format |
//! | [`HdfExtractor`] | HDF5 containers | groups, dataset names, shapes, dtypes |
//! | [`TabularExtractor`] | csv, tsv, xlsx | sheets, rows, columns, column types, preview rows |
//! | [`StructuredExtractor`] | json, yaml | validity, root keys, depth |
//! | [`SourceExtractor`] | python | imports, classes, functions |
//! | [`TextExtractor`] | text/* | counts, preview, language, keywords |
//! | [`FallbackExtractor`] | anything | core fields only |

pub mod fallback;
pub mod hdf;
pub mod image;
pub mod pdf;
pub mod registry;
pub mod source;
pub mod structured;
pub mod tabular;
pub mod text;

use std::io::Read;

use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

pub use fallback::FallbackExtractor;
pub use hdf::HdfExtractor;
pub use image::ImageExtractor;
pub use pdf::PdfExtractor;
pub use registry::ExtractorRegistry;
pub use source::SourceExtractor;
pub use structured::StructuredExtractor;
pub use tabular::TabularExtractor;
pub use text::TextExtractor;

/// A metadata extractor for one family of file formats.
///
/// Implementations must be cheap to share across worker threads; the
/// registry holds them behind `Arc` and calls them concurrently.
pub trait Extractor: Send + Sync {
    /// Short identifier recorded in each record's `extractor` field.
    fn name(&self) -> &str;

    /// Whether this extractor claims `entry`. Must only look at the entry's
    /// name and the sniffed bytes, never the full file.
    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool;

    /// Produce the extractor-specific fields for `entry`.
    ///
    /// Secondary analysis that is merely inconclusive (no language detected,
    /// no info dictionary) omits the field instead of failing.
    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError>;
}

/// Bytes sniffed from the start of a file.
pub const SNIFF_LEN: usize = 512;

/// A short content sample used to pick an extractor without a full decode.
#[derive(Debug, Clone, Default)]
pub struct Sniff {
    head: Vec<u8>,
    mime: String,
}

const MAGIC: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"\x89HDF\r\n\x1a\n", "application/x-hdf5"),
    (&[0x0E, 0x03, 0x13, 0x01], "application/x-hdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"BM", "image/bmp"),
];

impl Sniff {
    /// Read up to [`SNIFF_LEN`] bytes of `entry`. A file that cannot be
    /// opened or read is `Unreadable` before any extractor sees it.
    pub fn read(entry: &FileEntry) -> Result<Self, ExtractionError> {
        let unreadable = |e: std::io::Error| ExtractionError::unreadable(&entry.path, &e);
        let file = std::fs::File::open(&entry.path).map_err(unreadable)?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(unreadable)?;
        Ok(Self::from_bytes(entry, head))
    }

    pub fn from_bytes(entry: &FileEntry, head: Vec<u8>) -> Self {
        let mime = detect_mime(entry, &head);
        Self { head, mime }
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Detected MIME type: extension first, then magic bytes, then a
    /// text/binary guess.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn starts_with(&self, magic: &[u8]) -> bool {
        self.head.starts_with(magic)
    }

    /// Non-empty, NUL-free, and valid UTF-8 apart from a character cut off
    /// at the end of the sample.
    pub fn looks_like_text(&self) -> bool {
        looks_like_text(&self.head)
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

fn magic_mime(head: &[u8]) -> Option<&'static str> {
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    MAGIC
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime)
}

fn detect_mime(entry: &FileEntry, head: &[u8]) -> String {
    if let Some(mime) = mime_guess::from_path(&entry.path).first_raw() {
        return mime.to_string();
    }
    if let Some(mime) = magic_mime(head) {
        return mime.to_string();
    }
    if looks_like_text(head) {
        return "text/plain".to_string();
    }
    "application/octet-stream".to_string()
}


#[cfg(test)]
mod tests {
    use super::test_support::entry_for;
    use super::*;

    #[test]
    fn extension_wins_over_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let sniff = Sniff::read(&entry_for(&path)).unwrap();
        assert_eq!(sniff.mime(), "text/csv");
        assert!(sniff.looks_like_text());
    }

    #[test]
    fn magic_bytes_identify_extensionless_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        std::fs::write(&path, b"%PDF-1.4\n...").unwrap();
        assert_eq!(
            Sniff::read(&entry_for(&path)).unwrap().mime(),
            "application/pdf"
        );
    }

    #[test]
    fn binary_without_magic_is_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, [0x00, 0x13, 0x37, 0xFE, 0xFF]).unwrap();
        let sniff = Sniff::read(&entry_for(&path)).unwrap();
        assert_eq!(sniff.mime(), "application/octet-stream");
        assert!(!sniff.looks_like_text());
    }

    #[test]
    fn truncated_utf8_still_counts_as_text() {
        // "é" is two bytes; keep only the first.
        assert!(looks_like_text(&[b'c', b'a', b'f', 0xC3]));
        assert!(!looks_like_text(&[0xC3, b'x']));
    }
}
