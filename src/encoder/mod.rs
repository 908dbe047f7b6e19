//! Face embedding extraction.
//!
//! The rest of the crate treats extraction as a black box behind the
//! `FaceEncoder` trait: image bytes in, embedding out, or `None` when no
//! face is present. The production implementation runs a pair of ONNX
//! models (`onnx`); tests substitute their own encoders.

mod onnx;

pub use onnx::OnnxFaceEncoder;

/// Errors from the embedding extractor.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("encoder initialization failed: {0}")]
    Init(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Black-box "image bytes -> embedding" collaborator.
///
/// `Ok(None)` means the image decoded fine but contains no detectable
/// face; decode and inference failures are errors, not "no face".
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image_bytes: &[u8]) -> Result<Option<Vec<f32>>, EncoderError>;

    /// Length of the vectors this encoder produces.
    fn dimensions(&self) -> usize;

    /// Stable name identifying the underlying model, used to tag stored
    /// corpora so an incompatible encoder fails loudly at load time.
    fn model_name(&self) -> &str;
}

/// SHA256 hash of a model name, for the storage header tag.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_hash_deterministic() {
        assert_eq!(model_id_hash("sface-2021dec"), model_id_hash("sface-2021dec"));
        assert_ne!(model_id_hash("sface-2021dec"), model_id_hash("other-model"));
    }
}
