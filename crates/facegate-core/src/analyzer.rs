//! The seam between capture flows and the vision models.

use crate::detector::{DetectorError, FaceDetector};
use crate::landmarks::{LandmarkError, LandmarkModel};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding, GrayImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const LANDMARK_MODEL_FILE: &str = "landmarks_68.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("eye landmark model not loaded (expected {0})")]
    NoLandmarkModel(String),
}

/// Face detection, encoding and eye-openness measurement on grayscale frames.
pub trait FaceAnalyzer {
    /// All faces in the frame, most confident first.
    fn detect(&mut self, image: &GrayImage<'_>) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Encoding for one detected face.
    fn encode(
        &mut self,
        image: &GrayImage<'_>,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError>;

    /// Mean eye aspect ratio of one detected face.
    fn eye_aspect_ratio(
        &mut self,
        image: &GrayImage<'_>,
        face: &BoundingBox,
    ) -> Result<f32, AnalyzerError>;

    /// Whether `eye_aspect_ratio` can be served.
    fn supports_blink(&self) -> bool;
}

/// ONNX Runtime implementation: SCRFD + ArcFace, optional 68-point landmarks.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    landmarks: Option<LandmarkModel>,
    landmark_path: PathBuf,
}

impl OnnxAnalyzer {
    /// Load all models from `model_dir`. The landmark model is optional.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;

        let landmark_path = model_dir.join(LANDMARK_MODEL_FILE);
        let landmarks = match LandmarkModel::load(&landmark_path) {
            Ok(model) => Some(model),
            Err(LandmarkError::ModelNotFound(path)) => {
                tracing::warn!(path = %path, "no landmark model; blink liveness unavailable");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            detector,
            recognizer,
            landmarks,
            landmark_path,
        })
    }

    /// Minimum detector score for a face to be reported.
    pub fn with_detection_confidence(mut self, threshold: f32) -> Self {
        self.detector = self.detector.with_confidence_threshold(threshold);
        self
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, image: &GrayImage<'_>) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(
        &mut self,
        image: &GrayImage<'_>,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.encode(image, face)?)
    }

    fn eye_aspect_ratio(
        &mut self,
        image: &GrayImage<'_>,
        face: &BoundingBox,
    ) -> Result<f32, AnalyzerError> {
        let model = self.landmarks.as_mut().ok_or_else(|| {
            AnalyzerError::NoLandmarkModel(self.landmark_path.display().to_string())
        })?;
        Ok(model.eyes(image, face)?.mean_ear())
    }

    fn supports_blink(&self) -> bool {
        self.landmarks.is_some()
    }
}
