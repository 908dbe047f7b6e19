//! Face encoding records and the in-memory corpus.

use serde::{Deserialize, Serialize};

/// A single stored face encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Label the encoding was stored under (usually an image file name).
    /// Labels are not unique; the same label may appear more than once.
    pub label: String,
    /// The embedding vector produced by the face encoder.
    pub vector: Vec<f32>,
}

impl FaceRecord {
    pub fn new(label: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            vector,
        }
    }
}

/// Errors from corpus mutation.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Ordered collection of face encodings.
///
/// Insertion order is append order and is significant: ranking ties are
/// broken by it. Once the set is non-empty, every vector must have the
/// same length as the first one.
#[derive(Debug, Clone, Default)]
pub struct EncodingSet {
    records: Vec<FaceRecord>,
}

impl EncodingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Vector length shared by every record, or `None` while empty.
    pub fn dimensions(&self) -> Option<usize> {
        self.records.first().map(|r| r.vector.len())
    }

    /// Append a record, enforcing the shared-dimensionality invariant.
    pub fn push(&mut self, record: FaceRecord) -> Result<(), RecordError> {
        if let Some(expected) = self.dimensions() {
            if record.vector.len() != expected {
                return Err(RecordError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FaceRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[FaceRecord] {
        &self.records
    }
}
