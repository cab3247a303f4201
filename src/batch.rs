//! Grouping of records into size-bounded batches.

use crate::models::{Batch, MetadataRecord};

/// Buffers records and seals them into [`Batch`]es of at most `max_size`.
///
/// Batches come out in the order their records were added, numbered from 0.
#[derive(Debug)]
pub struct RecordBatcher {
    max_size: usize,
    pending: Vec<MetadataRecord>,
    next_index: usize,
}

impl RecordBatcher {
    /// A `max_size` of 0 is treated as 1.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            pending: Vec::with_capacity(max_size),
            next_index: 0,
        }
    }

    /// Buffer `record`; returns the sealed batch when it fills up.
    pub fn add(&mut self, record: MetadataRecord) -> Option<Batch> {
        self.pending.push(record);
        if self.pending.len() >= self.max_size {
            self.seal()
        } else {
            None
        }
    }

    /// Seal whatever is buffered. `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            self.seal()
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Batches sealed so far.
    pub fn sealed(&self) -> usize {
        self.next_index
    }

    fn seal(&mut self) -> Option<Batch> {
        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_size));
        let batch = Batch::seal(self.next_index, records);
        self.next_index += 1;
        Some(batch)
    }
}
