//! Chunk builder
//!
//! Buffers parsed records and hands out fixed-size [`Batch`]es. A full batch is
//! detached and replaced by a fresh buffer; whatever is left at end of stream
//! becomes one final, smaller batch.

use std::mem;

use crate::models::AdReportRecord;

/// Default number of records per persistence batch
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// One unit of persistence work
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based position of this batch within its job
    pub sequence: usize,
    pub records: Vec<AdReportRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct ChunkBuilder {
    size: usize,
    buffer: Vec<AdReportRecord>,
    issued: usize,
}

impl ChunkBuilder {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            buffer: Vec::with_capacity(size),
            issued: 0,
        }
    }

    /// Add a record, returning a full batch once the threshold is reached
    pub fn push(&mut self, record: AdReportRecord) -> Option<Batch> {
        self.buffer.push(record);
        if self.buffer.len() >= self.size {
            let records = mem::replace(&mut self.buffer, Vec::with_capacity(self.size));
            Some(self.issue(records))
        } else {
            None
        }
    }

    /// Flush the trailing partial batch, if any
    pub fn finish(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let records = mem::take(&mut self.buffer);
        Some(self.issue(records))
    }

    /// Batches handed out so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Records currently buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn issue(&mut self, records: Vec<AdReportRecord>) -> Batch {
        self.issued += 1;
        Batch {
            sequence: self.issued,
            records,
        }
    }
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
