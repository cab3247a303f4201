//! Plain-text extraction: counts, preview, language guess, keywords.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde_json::Value;

use super::{Extractor, Sniff};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "ini", "cfg", "conf", "toml", "xml", "html", "htm",
    "tex", "sh", "c", "h", "cpp", "hpp", "rs", "go", "java", "js", "ts", "r", "sql",
];

const ENGLISH: &[&str] = &[
    "the", "and", "is", "in", "to", "of", "that", "for", "with", "this", "are", "was",
];
const SPANISH: &[&str] = &[
    "el", "la", "de", "que", "y", "en", "un", "es", "por", "los", "las", "una",
];
const FRENCH: &[&str] = &[
    "le", "la", "les", "et", "est", "des", "une", "du", "que", "pour", "dans", "pas",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "see", "who",
    "did", "get", "let", "she", "too", "use", "this", "that", "with", "from", "have", "they",
    "will", "would", "there", "their", "what", "about", "which", "when", "were", "been", "into",
    "than", "then", "them", "these", "some", "could", "other",
];

pub struct TextExtractor {
    max_bytes: usize,
    preview_chars: usize,
    max_keywords: usize,
}

impl TextExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            max_bytes: config.max_text_bytes,
            preview_chars: config.preview_chars,
            max_keywords: config.max_keywords,
        }
    }
}

impl Extractor for TextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(TEXT_EXTENSIONS)
            || sniff.mime().starts_with("text/")
            || sniff.looks_like_text()
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let (bytes, truncated) = read_capped(&entry.path, self.max_bytes)?;
        let text = decode_lossy(&bytes);

        let mut fields = Fields::new();
        fields.insert(
            "content_preview".into(),
            Value::String(preview(&text, self.preview_chars)),
        );
        fields.insert("line_count".into(), Value::from(text.lines().count()));
        fields.insert("word_count".into(), Value::from(word_count(&text)));
        fields.insert("char_count".into(), Value::from(text.chars().count()));
        fields.insert("truncated".into(), Value::Bool(truncated));

        if let Some(language) = detect_language(&text) {
            fields.insert("language".into(), Value::String(language.into()));
        }
        let keywords = keywords(&text, self.max_keywords);
        if !keywords.is_empty() {
            fields.insert(
                "keywords".into(),
                Value::Array(keywords.into_iter().map(Value::String).collect()),
            );
        }
        Ok(fields)
    }
}

/// Read at most `max` bytes. The flag reports whether the file had more.
pub(crate) fn read_capped(path: &Path, max: usize) -> Result<(Vec<u8>, bool), ExtractionError> {
    let file = std::fs::File::open(path).map_err(|e| ExtractionError::unreadable(path, &e))?;
    let mut bytes = Vec::new();
    file.take(max as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| ExtractionError::unreadable(path, &e))?;
    let truncated = bytes.len() > max;
    bytes.truncate(max);
    Ok((bytes, truncated))
}

/// Decode as UTF-8, dropping a character split by the read cap and
/// replacing anything else invalid.
pub(crate) fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(e) if e.error_len().is_none() => String::from_utf8_lossy(&bytes[..e.valid_up_to()]),
        Err(_) => String::from_utf8_lossy(bytes),
    }
}

/// First `max_chars` characters of `text`.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

pub(crate) fn word_count(text: &str) -> usize {
    words(text).count()
}

/// Common-word vote between English, Spanish, and French. `None` when no
/// marker words appear or the top two languages tie.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut scores = [("en", 0usize), ("es", 0), ("fr", 0)];
    for word in words(text) {
        let word = word.to_lowercase();
        for (i, list) in [ENGLISH, SPANISH, FRENCH].iter().enumerate() {
            if list.contains(&word.as_str()) {
                scores[i].1 += 1;
            }
        }
    }
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    let (best, top) = scores[0];
    if top == 0 || scores[1].1 == top {
        return None;
    }
    Some(best)
}

/// Most frequent words of three or more characters, stop words removed.
/// Ties break alphabetically so the result is deterministic.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in words(text) {
        if word.chars().count() < 3 {
            continue;
        }
        let word = word.to_lowercase();
        if STOP_WORDS.contains(&word.as_str()) || word.chars().all(|c| c.is_numeric()) {
            continue;
        }
        *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}
