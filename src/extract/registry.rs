//! Extractor registry and per-file dispatch.

use std::sync::Arc;

use tracing::debug;

use super::{
    Extractor, FallbackExtractor, HdfExtractor, ImageExtractor, PdfExtractor, Sniff,
    SourceExtractor, StructuredExtractor, TabularExtractor, TextExtractor,
};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{ExtractionOutcome, FileEntry, MetadataRecord, RecordTemplate, SkipReason};

/// Ordered set of extractors. Read-only once the crawl starts, so it is
/// shared between workers behind an `Arc` without locking.
pub struct ExtractorRegistry {
    custom: Vec<Arc<dyn Extractor>>,
    builtin: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// A registry with no extractors; everything resolves to "none".
    pub fn new() -> Self {
        Self {
            custom: Vec::new(),
            builtin: Vec::new(),
        }
    }

    /// The built-in extractors, specialised formats first. The generic
    /// fallback is appended when `config.enable_fallback` is set.
    pub fn with_builtins(config: &ExtractConfig) -> Self {
        let mut builtin: Vec<Arc<dyn Extractor>> = vec![
            Arc::new(PdfExtractor::new(config)),
            Arc::new(ImageExtractor::new()),
            Arc::new(HdfExtractor::new(config)),
            Arc::new(TabularExtractor::new(config)),
            Arc::new(StructuredExtractor::new(config)),
            Arc::new(SourceExtractor::new()),
            Arc::new(TextExtractor::new(config)),
        ];
        if config.enable_fallback {
            builtin.push(Arc::new(FallbackExtractor));
        }
        Self {
            custom: Vec::new(),
            builtin,
        }
    }

    /// Register a user extractor. User extractors are consulted before the
    /// built-ins, in registration order, so they can override them.
    pub fn register<E: Extractor + 'static>(&mut self, extractor: E) {
        self.register_arc(Arc::new(extractor));
    }

    pub fn register_arc(&mut self, extractor: Arc<dyn Extractor>) {
        debug!(extractor = extractor.name(), "registered extractor");
        self.custom.push(extractor);
    }

    /// Names in resolution order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered().map(|e| e.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && self.builtin.is_empty()
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn Extractor>> {
        self.custom.iter().chain(self.builtin.iter())
    }

    /// The first extractor that claims `entry`, sniffing its head.
    pub fn resolve(&self, entry: &FileEntry) -> Result<Option<Arc<dyn Extractor>>, ExtractionError> {
        let sniff = Sniff::read(entry)?;
        Ok(self.resolve_with(entry, &sniff).cloned())
    }

    pub fn resolve_with(&self, entry: &FileEntry, sniff: &Sniff) -> Option<&Arc<dyn Extractor>> {
        self.ordered().find(|e| e.can_handle(entry, sniff))
    }

    /// Sniff, resolve, and extract a single file into an outcome.
    pub fn extract(&self, entry: &FileEntry, template: &RecordTemplate) -> ExtractionOutcome {
        let sniff = match Sniff::read(entry) {
            Ok(sniff) => sniff,
            Err(err) => {
                debug!(path = %entry.path.display(), error = %err, "sniff failed");
                return ExtractionOutcome::Failed(err);
            }
        };
        let Some(extractor) = self.resolve_with(entry, &sniff) else {
            debug!(path = %entry.path.display(), mime = sniff.mime(), "no extractor matched");
            return ExtractionOutcome::Skipped(SkipReason::NoExtractor);
        };

        match extractor.extract(entry) {
            Ok(fields) => ExtractionOutcome::Success(MetadataRecord::assemble(
                entry,
                sniff.mime(),
                extractor.name(),
                fields,
                template,
            )),
            Err(err) => {
                debug!(path = %entry.path.display(), extractor = extractor.name(), error = %err, "extraction failed");
                ExtractionOutcome::Failed(err)
            }
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtins(&ExtractConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;
    use crate::extract::test_support::entry_for;
    use crate::models::Fields;
    use serde_json::Value;
    use std::path::Path;

    struct Upper;

    impl Extractor for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn can_handle(&self, entry: &FileEntry, _sniff: &Sniff) -> bool {
            entry.has_extension(&["txt"])
        }
        fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
            let text = std::fs::read_to_string(&entry.path)
                .map_err(|e| ExtractionError::unreadable(&entry.path, &e))?;
            let mut fields = Fields::new();
            fields.insert("upper".into(), Value::String(text.to_uppercase()));
            Ok(fields)
        }
    }

    #[test]
    fn builtins_resolve_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("t.csv");
        std::fs::write(&csv, "a,b\n1,2\n").unwrap();
        let txt = dir.path().join("t.txt");
        std::fs::write(&txt, "hello").unwrap();

        let registry = ExtractorRegistry::default();
        let name = |p: &std::path::Path| {
            let extractor = registry.resolve(&entry_for(p)).unwrap().unwrap();
            extractor.name().to_string()
        };
        assert_eq!(name(&csv), "tabular");
        assert_eq!(name(&txt), "text");
    }

    #[test]
    fn user_extractors_override_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("t.txt");
        std::fs::write(&txt, "hello").unwrap();

        let mut registry = ExtractorRegistry::default();
        registry.register(Upper);
        assert_eq!(registry.names()[0], "upper");

        match registry.extract(&entry_for(&txt), &RecordTemplate::default()) {
            ExtractionOutcome::Success(record) => {
                assert_eq!(record.get("upper").unwrap(), "HELLO");
                assert_eq!(record.get("extractor").unwrap(), "upper");
                assert_eq!(record.get("mime_type").unwrap(), "text/plain");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn unknown_binary_uses_fallback_or_skips() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("payload.zzq");
        std::fs::write(&blob, [0u8, 1, 2, 3, 250, 251]).unwrap();
        let entry = entry_for(&blob);

        let with_fallback = ExtractorRegistry::default();
        match with_fallback.extract(&entry, &RecordTemplate::default()) {
            ExtractionOutcome::Success(record) => {
                assert_eq!(record.get("extractor").unwrap(), "generic");
                assert_eq!(record.get("mime_type").unwrap(), "application/octet-stream");
            }
            other => panic!("expected fallback success, got {other:?}"),
        }

        let config = ExtractConfig {
            enable_fallback: false,
            ..ExtractConfig::default()
        };
        let without_fallback = ExtractorRegistry::with_builtins(&config);
        assert!(matches!(
            without_fallback.extract(&entry, &RecordTemplate::default()),
            ExtractionOutcome::Skipped(SkipReason::NoExtractor)
        ));
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("t.txt");
        std::fs::write(&txt, "hello").unwrap();
        let registry = ExtractorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve(&entry_for(&txt)).unwrap().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn read_error_is_unreadable_not_fallback() {
        // Reading offset 0 of a process's own memory fails with EIO, even as root.
        let entry = FileEntry::stat(Path::new("/proc/self"), Path::new("/proc/self/mem")).unwrap();
        match ExtractorRegistry::default().extract(&entry, &RecordTemplate::default()) {
            ExtractionOutcome::Failed(err) => assert_eq!(err.kind, ExtractionErrorKind::Unreadable),
            other => panic!("expected unreadable, got {other:?}"),
        }
        assert!(ExtractorRegistry::default().resolve(&entry).is_err());
    }

    #[test]
    fn vanished_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.zzq");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let entry = entry_for(&path);
        std::fs::remove_file(&path).unwrap();

        match ExtractorRegistry::default().extract(&entry, &RecordTemplate::default()) {
            ExtractionOutcome::Failed(err) => assert_eq!(err.kind, ExtractionErrorKind::Unreadable),
            other => panic!("expected unreadable, got {other:?}"),
        }
    }
}
