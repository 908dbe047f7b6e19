//! High-level face matching operations.
//!
//! Ties the encoder and the encoding store together. All storage access
//! for a request goes through one `FaceService`; the append mutex
//! serializes the load-append-rewrite cycle so concurrent ingests inside
//! the daemon cannot drop each other's records. Cross-process exclusion
//! is the file lock acquired in main (see `lock`).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{
    app::errors::AppError,
    encoder::FaceEncoder,
    encodings::{rank, EncodingStore, FaceMatch, FaceRecord},
};

/// Confirmation returned by an ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedFace {
    pub label: String,
    /// Corpus size after the append.
    pub total: usize,
}

pub struct FaceService {
    store: EncodingStore,
    encoder: Box<dyn FaceEncoder>,
    top_k: usize,
    append_lock: Mutex<()>,
}

impl FaceService {
    pub fn new(store: EncodingStore, encoder: Box<dyn FaceEncoder>, top_k: usize) -> Self {
        Self {
            store,
            encoder,
            top_k,
            append_lock: Mutex::new(()),
        }
    }

    /// Extract an encoding from the image and append it under `label`.
    ///
    /// Labels are not deduplicated; adding the same label twice stores two
    /// records. Storage is untouched when no face is found.
    pub fn add_face(&self, label: &str, image_bytes: &[u8]) -> Result<AddedFace, AppError> {
        let vector = self
            .encoder
            .encode(image_bytes)?
            .ok_or(AppError::NoFaceDetected)?;

        let total = {
            let _guard = self
                .append_lock
                .lock()
                .map_err(|e| anyhow::anyhow!("append lock poisoned: {e}"))?;
            self.store.append(FaceRecord::new(label, vector))?
        };

        log::info!("added encoding for {label}, corpus size now {total}");

        Ok(AddedFace {
            label: label.to_string(),
            total,
        })
    }

    /// Rank the stored corpus against the face in the image.
    ///
    /// The corpus is checked before the image is decoded, so querying an
    /// empty store fails fast without running the encoder.
    pub fn compare(
        &self,
        image_bytes: &[u8],
        top_k: Option<usize>,
    ) -> Result<Vec<FaceMatch>, AppError> {
        let corpus = self.store.load()?;
        if corpus.is_empty() {
            return Err(AppError::EmptyCorpus);
        }

        let query = self
            .encoder
            .encode(image_bytes)?
            .ok_or(AppError::NoFaceDetected)?;

        let matches = rank(&query, &corpus, top_k.unwrap_or(self.top_k))?;
        log::debug!("ranked {} records, returning {}", corpus.len(), matches.len());

        Ok(matches)
    }

    /// Number of stored encodings.
    pub fn total(&self) -> Result<usize, AppError> {
        Ok(self.store.load()?.len())
    }
}
