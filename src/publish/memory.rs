use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{IngestAck, SearchIndex};
use crate::error::PublishError;
use crate::models::MetadataRecord;

/// An index held in memory. Ingesting an existing subject replaces it, as
/// the remote index does.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<String, MetadataRecord>>,
    ingests: RwLock<Vec<usize>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subjects currently stored, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Size of every ingest call received, in order.
    pub fn ingest_sizes(&self) -> Vec<usize> {
        self.ingests.read().map(|i| i.clone()).unwrap_or_default()
    }
}

fn poisoned() -> PublishError {
    PublishError::Transient {
        attempts: 1,
        message: "memory index lock poisoned".into(),
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ingest(&self, records: &[MetadataRecord]) -> Result<IngestAck, PublishError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for record in records {
            entries.insert(record.subject.clone(), record.clone());
        }
        drop(entries);
        self.ingests
            .write()
            .map_err(|_| poisoned())?
            .push(records.len());
        Ok(IngestAck {
            task_id: None,
            accepted: records.len(),
        })
    }

    async fn get_entry(&self, subject: &str) -> Result<MetadataRecord, PublishError> {
        self.entries
            .read()
            .map_err(|_| poisoned())?
            .get(subject)
            .cloned()
            .ok_or_else(|| PublishError::NotFound {
                subject: subject.to_string(),
            })
    }

    async fn delete_entry(&self, subject: &str) -> Result<(), PublishError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .remove(subject)
            .map(|_| ())
            .ok_or_else(|| PublishError::NotFound {
                subject: subject.to_string(),
            })
    }
}
