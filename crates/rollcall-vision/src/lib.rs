//! rollcall-vision: ONNX face detection and recognition.
//!
//! SCRFD finds faces, ArcFace embeds them. [`OnnxVision`] bundles both behind
//! the core [`FaceVision`] trait.

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use image::RgbImage;
use rollcall_core::{BoundingBox, Embedding, FaceVision, VisionError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD model file name inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace model file name inside the model directory.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

/// Detector + recognizer pair.
pub struct OnnxVision {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxVision {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, LoadError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceVision for OnnxVision {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        self.detector
            .detect(image)
            .map_err(|e| VisionError::Detection(e.to_string()))
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, VisionError> {
        faces
            .iter()
            .map(|face| {
                self.recognizer
                    .extract(image, face)
                    .map_err(|e| VisionError::Embedding(e.to_string()))
            })
            .collect()
    }
}
