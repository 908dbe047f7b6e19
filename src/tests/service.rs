//! Service-level tests for the add/compare flows.
//!
//! The encoder seam is replaced by a mock that reads its "images" as
//! UTF-8: a comma-separated float list becomes that embedding, the
//! literal `noface` means no face was detected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::app::{AppError, FaceService};
use crate::encoder::{model_id_hash, EncoderError, FaceEncoder};
use crate::encodings::{EncodingStore, EncodingStoreError, RankError};

struct MockEncoder {
    calls: Arc<AtomicUsize>,
}

impl MockEncoder {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_counter(calls: Arc<AtomicUsize>) -> Self {
        Self { calls }
    }
}

impl FaceEncoder for MockEncoder {
    fn encode(&self, image_bytes: &[u8]) -> Result<Option<Vec<f32>>, EncoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let text = std::str::from_utf8(image_bytes)
            .map_err(|e| EncoderError::Inference(e.to_string()))?;
        if text == "noface" {
            return Ok(None);
        }

        let vector = text
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| EncoderError::Inference(e.to_string()))?;
        Ok(Some(vector))
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

fn service_in(dir: &std::path::Path) -> FaceService {
    service_with_encoder(dir, MockEncoder::new())
}

fn service_with_encoder(dir: &std::path::Path, encoder: MockEncoder) -> FaceService {
    let store = EncodingStore::new(dir.join("faces.bin"), model_id_hash(encoder.model_name()));
    FaceService::new(store, Box::new(encoder), 20)
}

#[test]
fn test_add_then_compare_ranks_exact_match_first() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    service.add_face("alice.jpg", b"1,0,0").unwrap();
    service.add_face("bob.jpg", b"1,0.3,0").unwrap();

    let matches = service.compare(b"1,0,0", None).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].label, "alice.jpg");
    assert_eq!(matches[0].similarity, 100.0);
    assert_eq!(matches[1].label, "bob.jpg");
    assert_eq!(matches[1].similarity, 70.0);
}

#[test]
fn test_compare_on_empty_corpus_skips_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service_with_encoder(dir.path(), MockEncoder::with_counter(calls.clone()));

    let result = service.compare(b"1,0,0", None);
    assert!(matches!(result, Err(AppError::EmptyCorpus)));
    // empty corpus is rejected before the image is ever decoded
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_no_face_on_add_leaves_storage_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    let result = service.add_face("ghost.jpg", b"noface");
    assert!(matches!(result, Err(AppError::NoFaceDetected)));

    assert!(!dir.path().join("faces.bin").exists());
    assert_eq!(service.total().unwrap(), 0);
}

#[test]
fn test_no_face_on_compare() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());
    service.add_face("alice.jpg", b"1,0,0").unwrap();

    let result = service.compare(b"noface", None);
    assert!(matches!(result, Err(AppError::NoFaceDetected)));
}

#[test]
fn test_add_reports_running_total() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    let first = service.add_face("a.jpg", b"1,0,0").unwrap();
    assert_eq!(first.label, "a.jpg");
    assert_eq!(first.total, 1);

    let second = service.add_face("b.jpg", b"0,1,0").unwrap();
    assert_eq!(second.total, 2);

    assert_eq!(service.total().unwrap(), 2);
}

#[test]
fn test_top_k_override_and_default() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    for i in 0..5 {
        let img = format!("{}.1,0,0", i);
        service.add_face(&format!("face{i}.jpg"), img.as_bytes()).unwrap();
    }

    assert_eq!(service.compare(b"0,0,0", None).unwrap().len(), 5);
    assert_eq!(service.compare(b"0,0,0", Some(2)).unwrap().len(), 2);
}

#[test]
fn test_duplicate_labels_both_appear() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    service.add_face("same.jpg", b"1,0,0").unwrap();
    service.add_face("same.jpg", b"0,1,0").unwrap();

    let matches = service.compare(b"0,0,1", None).unwrap();
    assert_eq!(matches.len(), 2);
    assert!(matches.iter().all(|m| m.label == "same.jpg"));
}

#[test]
fn test_corpus_survives_service_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let service = service_in(dir.path());
        service.add_face("alice.jpg", b"1,0,0").unwrap();
    }

    let service = service_in(dir.path());
    assert_eq!(service.total().unwrap(), 1);

    let matches = service.compare(b"1,0,0", None).unwrap();
    assert_eq!(matches[0].label, "alice.jpg");
    assert_eq!(matches[0].similarity, 100.0);
}

#[test]
fn test_query_dimension_mismatch_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    service.add_face("alice.jpg", b"1,0,0").unwrap();

    let result = service.compare(b"1,0", None);
    assert!(matches!(
        result,
        Err(AppError::Rank(RankError::DimensionMismatch { query: 2, corpus: 3 }))
    ));
}

#[test]
fn test_distant_match_reports_negative_similarity() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    service.add_face("far.jpg", b"3,4,0").unwrap();

    let matches = service.compare(b"0,0,0", None).unwrap();
    // distance 5.0 -> similarity -400, passed through unclamped
    assert_eq!(matches[0].similarity, -400.0);
}

#[test]
fn test_corrupt_store_is_an_error_not_empty() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());
    service.add_face("alice.jpg", b"1,0,0").unwrap();

    // Scribble over the stored file
    std::fs::write(dir.path().join("faces.bin"), b"garbage").unwrap();

    let result = service.compare(b"1,0,0", None);
    assert!(matches!(
        result,
        Err(AppError::Storage(EncodingStoreError::InvalidFormat(_)))
    ));

    let result = service.total();
    assert!(matches!(result, Err(AppError::Storage(_))));
}

#[test]
fn test_concurrent_adds_all_survive() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(service_in(dir.path()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        handles.push(std::thread::spawn(move || {
            let img = format!("0.{i},0,0");
            service.add_face(&format!("face{i}.jpg"), img.as_bytes()).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // the append mutex means no load-append-rewrite cycle can be lost
    assert_eq!(service.total().unwrap(), 8);
}

#[test]
fn test_compare_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path());

    service.add_face("a.jpg", b"0.1,0.9,0").unwrap();
    service.add_face("b.jpg", b"0.5,0.5,0").unwrap();
    service.add_face("c.jpg", b"0.9,0.1,0").unwrap();

    let first = service.compare(b"0.2,0.8,0", None).unwrap();
    let second = service.compare(b"0.2,0.8,0", None).unwrap();
    assert_eq!(first, second);
}
