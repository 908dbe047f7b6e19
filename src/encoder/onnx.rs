//! ONNX-backed face encoder.
//!
//! Two sessions: a face detector and a face recognition model (e.g. the
//! YuNet + SFace pair from the OpenCV model zoo). The detector must emit
//! decoded detections as rows of `[x, y, w, h, 10 landmark coords, score]`
//! in input-canvas pixels; anchor decoding belongs in the exported graph,
//! not here. The best detection above the score threshold is cropped and
//! fed to the recognition model, whose output is L2-normalized.

use std::path::Path;
use std::sync::Mutex;

use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};

use crate::encoder::{EncoderError, FaceEncoder};

/// Detector input canvas is square, this size on a side
const DETECTOR_INPUT_SIZE: u32 = 640;

/// Recognition model input size
const FACE_INPUT_SIZE: u32 = 112;

/// bbox(4) + landmarks(10) + score(1)
const DETECTION_ROW_LEN: usize = 15;

/// A detected face in original-image coordinates.
#[derive(Debug, Clone, Copy)]
struct Detection {
    bbox: [f32; 4], // x, y, w, h
    score: f32,
}

pub struct OnnxFaceEncoder {
    /// ort's `Session::run` takes `&mut self`, hence the mutexes.
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    model_name: String,
    dimensions: usize,
    score_threshold: f32,
}

impl OnnxFaceEncoder {
    pub fn new(
        detector_model: &Path,
        recognition_model: &Path,
        model_name: &str,
        score_threshold: f32,
    ) -> Result<Self, EncoderError> {
        let detector = session_from_file(detector_model)?;
        let mut recognizer = session_from_file(recognition_model)?;

        let dimensions = probe_dimensions(&mut recognizer)?;
        log::info!(
            "face encoder '{}' ready, {} dimensions",
            model_name,
            dimensions
        );

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            model_name: model_name.to_string(),
            dimensions,
            score_threshold,
        })
    }

    fn detect_best_face(&self, img: &DynamicImage) -> Result<Option<Detection>, EncoderError> {
        let (orig_width, orig_height) = img.dimensions();
        let target = DETECTOR_INPUT_SIZE;

        // Pad to a square canvas to avoid distortion
        let max_dim = orig_width.max(orig_height).max(1);
        let scale = target as f32 / max_dim as f32;
        let new_width = ((orig_width as f32 * scale) as u32).max(1);
        let new_height = ((orig_height as f32 * scale) as u32).max(1);

        let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);
        let mut canvas = DynamicImage::new_rgb8(target, target);
        let offset_x = (target - new_width) / 2;
        let offset_y = (target - new_height) / 2;
        image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        let input_tensor = Value::from_array(image_to_bgr_array(&canvas)?)?;

        let mut session = self
            .detector
            .lock()
            .map_err(|e| EncoderError::Inference(format!("detector lock poisoned: {e}")))?;
        let outputs = session.run(ort::inputs![input_tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        let cols = shape
            .iter()
            .last()
            .copied()
            .ok_or_else(|| EncoderError::Inference("detector produced a scalar output".to_string()))?
            as usize;
        if cols != DETECTION_ROW_LEN {
            return Err(EncoderError::Inference(format!(
                "detector output rows have {cols} values, expected {DETECTION_ROW_LEN} \
                 (the model must emit decoded detections)"
            )));
        }

        // Best-scoring row above the threshold, mapped back to the
        // original image by undoing the canvas padding and scaling
        let best = data
            .chunks_exact(DETECTION_ROW_LEN)
            .filter(|row| row[14] >= self.score_threshold)
            .max_by(|a, b| a[14].partial_cmp(&b[14]).unwrap_or(std::cmp::Ordering::Equal))
            .map(|row| Detection {
                bbox: [
                    (row[0] - offset_x as f32) / scale,
                    (row[1] - offset_y as f32) / scale,
                    row[2] / scale,
                    row[3] / scale,
                ],
                score: row[14],
            });

        Ok(best)
    }

    fn crop_face(img: &DynamicImage, detection: &Detection) -> Option<DynamicImage> {
        let (img_w, img_h) = img.dimensions();

        let x = detection.bbox[0].max(0.0) as u32;
        let y = detection.bbox[1].max(0.0) as u32;
        if x >= img_w || y >= img_h {
            return None;
        }

        let w = (detection.bbox[2].max(0.0) as u32).min(img_w - x);
        let h = (detection.bbox[3].max(0.0) as u32).min(img_h - y);
        if w == 0 || h == 0 {
            return None;
        }

        Some(img.crop_imm(x, y, w, h))
    }

    fn embed_face(&self, face: &DynamicImage) -> Result<Vec<f32>, EncoderError> {
        let face = face.resize_exact(
            FACE_INPUT_SIZE,
            FACE_INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let input_tensor = Value::from_array(image_to_bgr_array(&face)?)?;

        let mut session = self
            .recognizer
            .lock()
            .map_err(|e| EncoderError::Inference(format!("recognizer lock poisoned: {e}")))?;
        let outputs = session.run(ort::inputs![input_tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        Ok(normalize_embedding(shape_to_embedding(shape.iter().copied(), data)))
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image_bytes: &[u8]) -> Result<Option<Vec<f32>>, EncoderError> {
        let img = image::load_from_memory(image_bytes)?;

        let detection = match self.detect_best_face(&img)? {
            Some(detection) => detection,
            None => return Ok(None),
        };
        log::debug!("best face score {:.3}", detection.score);

        // A detection entirely outside the frame is not a usable face
        let face = match Self::crop_face(&img, &detection) {
            Some(face) => face,
            None => return Ok(None),
        };

        self.embed_face(&face).map(Some)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn session_from_file(path: &Path) -> Result<Session, EncoderError> {
    if !path.exists() {
        return Err(EncoderError::Init(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)?)
}

/// Convert an image to a `[1, 3, H, W]` BGR array with values in [0, 255],
/// the layout both OpenCV-zoo face models expect.
fn image_to_bgr_array(img: &DynamicImage) -> Result<Array4<f32>, EncoderError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let pixel_count = (width * height) as usize;

    let mut input_data = vec![0f32; 3 * pixel_count];
    let (b_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    let pixels = rgb.as_raw();
    for i in 0..pixel_count {
        let idx = i * 3;
        r_channel[i] = pixels[idx] as f32;
        g_channel[i] = pixels[idx + 1] as f32;
        b_channel[i] = pixels[idx + 2] as f32;
    }

    Array4::from_shape_vec((1, 3, height as usize, width as usize), input_data)
        .map_err(|e| EncoderError::Inference(format!("bad tensor shape: {e}")))
}

/// Pull the embedding out of the recognizer output, expected shape [1, D].
fn shape_to_embedding(shape: impl Iterator<Item = i64>, data: &[f32]) -> Vec<f32> {
    let dims: Vec<i64> = shape.collect();
    let embedding_size = if dims.len() == 2 {
        dims[1] as usize
    } else {
        data.len()
    };
    data[0..embedding_size].to_vec()
}

fn normalize_embedding(embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding.iter().map(|x| x / norm).collect()
    } else {
        embedding
    }
}

fn probe_dimensions(session: &mut Session) -> Result<usize, EncoderError> {
    let zeros = vec![0f32; 3 * (FACE_INPUT_SIZE * FACE_INPUT_SIZE) as usize];
    let array = Array4::from_shape_vec(
        (1, 3, FACE_INPUT_SIZE as usize, FACE_INPUT_SIZE as usize),
        zeros,
    )
    .map_err(|e| EncoderError::Init(format!("bad probe shape: {e}")))?;
    let tensor = Value::from_array(array)?;

    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(|e| EncoderError::Init(format!("failed to probe dimensions: {e}")))?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EncoderError::Init(format!("failed to probe dimensions: {e}")))?;

    let dimensions = shape_to_embedding(shape.iter().copied(), data).len();
    if dimensions == 0 {
        return Err(EncoderError::Init(
            "recognition model returned an empty embedding".to_string(),
        ));
    }
    Ok(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_embedding_unit_norm() {
        let normalized = normalize_embedding(vec![3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        assert_eq!(normalize_embedding(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_shape_to_embedding_prefers_declared_width() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(shape_to_embedding([1i64, 3].into_iter(), &data), vec![1.0, 2.0, 3.0]);
        assert_eq!(shape_to_embedding([4i64].into_iter(), &data), data.to_vec());
    }

    // Integration test requires real model files - run with --ignored and
    // FACEMATCH_DETECTOR_MODEL / FACEMATCH_RECOGNITION_MODEL set.
    #[test]
    #[ignore = "requires onnx model files"]
    fn test_encode_with_real_models() {
        let detector = std::env::var("FACEMATCH_DETECTOR_MODEL").unwrap();
        let recognizer = std::env::var("FACEMATCH_RECOGNITION_MODEL").unwrap();

        let encoder = OnnxFaceEncoder::new(
            Path::new(&detector),
            Path::new(&recognizer),
            "sface-2021dec",
            0.6,
        )
        .unwrap();

        assert!(encoder.dimensions() > 0);

        // A flat gray image contains no face
        let img = DynamicImage::new_rgb8(64, 64);
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let result = encoder.encode(&bytes).unwrap();
        assert!(result.is_none());
    }
}
