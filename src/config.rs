use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encodings::DEFAULT_TOP_K;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default encoder model name, used to tag stored corpora
const DEFAULT_MODEL_NAME: &str = "sface-2021dec";
/// Default detector model file (OpenCV zoo YuNet export with decoded outputs)
const DEFAULT_DETECTOR_MODEL: &str = "models/face_detection_yunet_2023mar.onnx";
/// Default recognition model file (OpenCV zoo SFace)
const DEFAULT_RECOGNITION_MODEL: &str = "models/face_recognition_sface_2021dec.onnx";
/// Default minimum detector confidence for "a face is present"
const DEFAULT_SCORE_THRESHOLD: f32 = 0.6;

/// Configuration for the face encoder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Stable model name; changing the model invalidates stored corpora
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Path to the detector ONNX file, relative paths resolve against the
    /// base directory
    #[serde(default = "default_detector_model")]
    pub detector_model: String,

    /// Path to the recognition ONNX file
    #[serde(default = "default_recognition_model")]
    pub recognition_model: String,

    /// Detector confidence threshold [0.0, 1.0]
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            detector_model: DEFAULT_DETECTOR_MODEL.to_string(),
            recognition_model: DEFAULT_RECOGNITION_MODEL.to_string(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_detector_model() -> String {
    DEFAULT_DETECTOR_MODEL.to_string()
}

fn default_recognition_model() -> String {
    DEFAULT_RECOGNITION_MODEL.to_string()
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Address the daemon binds
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Matches returned per comparison
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            top_k: DEFAULT_TOP_K,
            encoder: EncoderConfig::default(),
            base_path: String::new(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Config {
    fn validate(&mut self) {
        if self.top_k == 0 {
            panic!("top_k must be greater than 0");
        }

        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            panic!("listen_addr is not a valid socket address: {}", self.listen_addr);
        }

        let enc = &self.encoder;
        if !(0.0..=1.0).contains(&enc.score_threshold) {
            panic!(
                "encoder.score_threshold must be between 0.0 and 1.0, got {}",
                enc.score_threshold
            );
        }

        if enc.model_name.is_empty() {
            panic!("encoder.model_name must not be empty");
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        std::fs::create_dir_all(base_path).expect("could not create base directory");
        let config_path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("could not write default config");
        }

        let config_str =
            std::fs::read_to_string(&config_path).expect("config file is not readable utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let config_path = Path::new(&self.base_path).join("config.yaml");
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(&config_path, config_str.as_bytes()).expect("could not save config");
    }

    /// Path of the persisted corpus file.
    pub fn encodings_path(&self) -> PathBuf {
        Path::new(&self.base_path).join("faces.bin")
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.resolve(&self.encoder.detector_model)
    }

    pub fn recognition_model_path(&self) -> PathBuf {
        self.resolve(&self.encoder.recognition_model)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.base_path).join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yml::to_string(&config).unwrap();
        let parsed: Config = serde_yml::from_str(&yaml).unwrap();

        assert_eq!(parsed.top_k, DEFAULT_TOP_K);
        assert_eq!(parsed.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(parsed.encoder.model_name, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_load_with_creates_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let config = Config::load_with(base);
        assert!(dir.path().join("config.yaml").exists());
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.encodings_path(), dir.path().join("faces.bin"));
    }

    #[test]
    fn test_relative_model_paths_resolve_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path().to_str().unwrap());

        assert!(config.detector_model_path().starts_with(dir.path()));
        assert!(config.recognition_model_path().starts_with(dir.path()));
    }

    #[test]
    #[should_panic(expected = "top_k")]
    fn test_zero_top_k_rejected() {
        let mut config = Config::default();
        config.top_k = 0;
        config.validate();
    }
}
