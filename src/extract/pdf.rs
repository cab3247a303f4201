//! PDF documents: page count and info dictionary via `lopdf`, text preview
//! via `pdf-extract`.

use std::panic::{self, AssertUnwindSafe};

use chrono::{FixedOffset, NaiveDate, SecondsFormat, TimeZone};
use lopdf::{Dictionary, Document, Object};
use serde_json::Value;

use super::text::{preview, word_count};
use super::{Extractor, Sniff};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

/// Info dictionary keys copied verbatim, paired with their field names.
const INFO_TEXT_KEYS: &[(&[u8], &str)] = &[
    (b"Title", "title"),
    (b"Author", "author"),
    (b"Subject", "subject"),
    (b"Keywords", "keywords"),
    (b"Creator", "creator"),
    (b"Producer", "producer"),
];
const INFO_DATE_KEYS: &[(&[u8], &str)] = &[
    (b"CreationDate", "creation_date"),
    (b"ModDate", "modification_date"),
];

pub struct PdfExtractor {
    text_preview: bool,
    preview_chars: usize,
}

impl PdfExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            text_preview: config.pdf_text_preview,
            preview_chars: config.preview_chars,
        }
    }
}

impl Extractor for PdfExtractor {
    fn name(&self) -> &str {
        "pdf"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(&["pdf"]) || sniff.starts_with(b"%PDF-")
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let path = entry.path.as_path();
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::unreadable(path, &e))?;
        let doc =
            Document::load_mem(&bytes).map_err(|e| ExtractionError::corrupt(path, e.to_string()))?;

        let mut fields = Fields::new();
        fields.insert("page_count".into(), Value::from(doc.get_pages().len()));
        fields.insert("pdf_version".into(), Value::String(doc.version.clone()));
        fields.insert("is_encrypted".into(), Value::Bool(doc.is_encrypted()));

        if let Some(info) = info_dictionary(&doc) {
            for (key, field) in INFO_TEXT_KEYS {
                if let Some(text) = info_text(info, key) {
                    fields.insert((*field).into(), Value::String(text));
                }
            }
            for (key, field) in INFO_DATE_KEYS {
                if let Some(raw) = info_text(info, key) {
                    let value = normalize_pdf_date(&raw).unwrap_or(raw);
                    fields.insert((*field).into(), Value::String(value));
                }
            }
        }

        if self.text_preview {
            // pdf-extract panics on some malformed content streams.
            match panic::catch_unwind(AssertUnwindSafe(|| {
                pdf_extract::extract_text_from_mem(&bytes)
            })) {
                Ok(Ok(text)) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        fields.insert(
                            "text_preview".into(),
                            Value::String(preview(text, self.preview_chars)),
                        );
                        fields.insert("word_count".into(), Value::from(word_count(text)));
                        fields.insert("char_count".into(), Value::from(text.chars().count()));
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(path = %path.display(), error = %e, "pdf text extraction failed");
                }
                Err(_) => {
                    tracing::debug!(path = %path.display(), "pdf text extraction panicked");
                }
            }
        }

        Ok(fields)
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn info_text(info: &Dictionary, key: &[u8]) -> Option<String> {
    let text = match info.get(key).ok()? {
        Object::String(bytes, _) => decode_text(bytes),
        Object::Name(name) => decode_text(name),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Text strings are UTF-16BE with a byte-order mark, UTF-8 with a BOM, or
/// PDFDocEncoding (treated as Latin-1).
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Convert a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`, trailing parts optional)
/// to RFC 3339.
pub fn normalize_pdf_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits_len = s.bytes().take_while(u8::is_ascii_digit).count();
    let digits = &s[..digits_len];
    if digits.len() < 4 {
        return None;
    }
    let part = |from: usize, default: u32| -> u32 {
        digits
            .get(from..from + 2)
            .and_then(|d| d.parse().ok())
            .unwrap_or(default)
    };
    let year: i32 = digits[..4].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, part(4, 1), part(6, 1))?.and_hms_opt(
        part(8, 0),
        part(10, 0),
        part(12, 0),
    )?;

    let zone = &s[digits_len..];
    let offset_secs = match zone.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = zone[1..].chars().filter(char::is_ascii_digit).collect();
            let hours: i32 = tz.get(0..2).and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i32 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        }
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    let dt = offset.from_local_datetime(&naive).single()?;
    Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;
    use crate::extract::test_support::entry_for;

    /// One-page PDF with an info dictionary and correct xref offsets.
    fn pdf_with_info(phrase: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let objects = [
            "1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n".to_string(),
            "2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n".to_string(),
            "3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n".to_string(),
            format!(
                "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content.len(),
                content
            ),
            "5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n".to_string(),
            "6 0 obj << /Title (Quarterly Report) /Author (Ada Lovelace) /CreationDate (D:20230115103000+01'00') >> endobj\n".to_string(),
        ];
        for object in &objects {
            offsets.push(out.len());
            out.extend_from_slice(object.as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 7\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 7 /Root 1 0 R /Info 6 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    #[test]
    fn page_count_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, pdf_with_info("quarterly numbers")).unwrap();

        let fields = PdfExtractor::new(&ExtractConfig::default())
            .extract(&entry_for(&path))
            .unwrap();
        assert_eq!(fields["page_count"], 1);
        assert_eq!(fields["title"], "Quarterly Report");
        assert_eq!(fields["author"], "Ada Lovelace");
        assert_eq!(fields["creation_date"], "2023-01-15T10:30:00+01:00");
        assert!(fields["text_preview"]
            .as_str()
            .unwrap()
            .contains("quarterly numbers"));
    }

    #[test]
    fn text_preview_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, pdf_with_info("hidden")).unwrap();
        let config = ExtractConfig {
            pdf_text_preview: false,
            ..ExtractConfig::default()
        };
        let fields = PdfExtractor::new(&config).extract(&entry_for(&path)).unwrap();
        assert!(!fields.contains_key("text_preview"));
        assert_eq!(fields["page_count"], 1);
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"%PDF-1.4 this is not really a pdf").unwrap();
        let err = PdfExtractor::new(&ExtractConfig::default())
            .extract(&entry_for(&path))
            .unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::Corrupt);
    }

    #[test]
    fn pdf_dates() {
        assert_eq!(
            normalize_pdf_date("D:20230115103000Z").as_deref(),
            Some("2023-01-15T10:30:00Z")
        );
        assert_eq!(
            normalize_pdf_date("D:199812231952-08'00'").as_deref(),
            Some("1998-12-23T19:52:00-08:00")
        );
        assert_eq!(
            normalize_pdf_date("D:2001").as_deref(),
            Some("2001-01-01T00:00:00Z")
        );
        assert_eq!(normalize_pdf_date("yesterday"), None);
    }

    #[test]
    fn utf16_info_strings() {
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, b'H', 0x00, b'i']), "Hi");
        assert_eq!(decode_text(b"caf\xe9"), "caf\u{e9}");
    }
}
