use super::{Extractor, Sniff};
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

/// Claims every file and contributes nothing beyond the core fields.
/// Registered last so it only sees files no other extractor wants.
pub struct FallbackExtractor;

impl Extractor for FallbackExtractor {
    fn name(&self) -> &str {
        "generic"
    }

    fn can_handle(&self, _entry: &FileEntry, _sniff: &Sniff) -> bool {
        true
    }

    fn extract(&self, _entry: &FileEntry) -> Result<Fields, ExtractionError> {
        Ok(Fields::new())
    }
}
