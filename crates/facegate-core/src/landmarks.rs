//! 68-point facial landmark model via ONNX Runtime, used for blink detection.
//!
//! Expects a PFLD-style export: one 1×3×112×112 input scaled to [0, 1] and a
//! flat output of 68 (x, y) pairs normalized to the input crop.

use crate::alignment::{self, SquareCrop};
use crate::liveness::eye_aspect_ratio;
use crate::types::{BoundingBox, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_COUNT: usize = 68;
/// Extra context around the detector box, as a fraction of its longer side.
const LANDMARK_CROP_MARGIN: f32 = 0.1;

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Both eye contours of one face, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub left: [(f32, f32); 6],
    pub right: [(f32, f32); 6],
}

impl EyeLandmarks {
    /// Take the eye contours out of a full 68-point set.
    pub fn from_68(points: &[(f32, f32)]) -> Option<Self> {
        if points.len() < LANDMARK_COUNT {
            return None;
        }
        Some(Self {
            left: std::array::from_fn(|i| points[LEFT_EYE.start + i]),
            right: std::array::from_fn(|i| points[RIGHT_EYE.start + i]),
        })
    }

    /// Mean eye aspect ratio of both eyes.
    pub fn mean_ear(&self) -> f32 {
        (eye_aspect_ratio(&self.left) + eye_aspect_ratio(&self.right)) / 2.0
    }
}

/// Dense landmark model.
pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded 68-point landmark model");
        Ok(Self { session })
    }

    /// Locate the eye contours of a detected face.
    pub fn eyes(
        &mut self,
        image: &GrayImage<'_>,
        face: &BoundingBox,
    ) -> Result<EyeLandmarks, LandmarkError> {
        let crop = SquareCrop::around(face, LANDMARK_CROP_MARGIN);
        let patch = alignment::crop_square(image, &crop, LANDMARK_INPUT_SIZE);
        let input = Array4::from_shape_fn(
            (1, 3, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE),
            |(_, _, y, x)| patch[y * LANDMARK_INPUT_SIZE + x] as f32 / 255.0,
        );

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark output: {e}")))?;

        let points = decode_points(raw, &crop).ok_or_else(|| {
            LandmarkError::InferenceFailed(format!(
                "expected {} values, got {}",
                LANDMARK_COUNT * 2,
                raw.len()
            ))
        })?;
        EyeLandmarks::from_68(&points)
            .ok_or_else(|| LandmarkError::InferenceFailed("incomplete landmark set".into()))
    }
}

/// Crop-normalized (x, y) pairs to frame coordinates.
fn decode_points(raw: &[f32], crop: &SquareCrop) -> Option<Vec<(f32, f32)>> {
    if raw.len() < LANDMARK_COUNT * 2 {
        return None;
    }
    Some(
        raw.chunks_exact(2)
            .take(LANDMARK_COUNT)
            .map(|p| crop.to_frame((p[0], p[1])))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_points_maps_to_frame() {
        let crop = SquareCrop { x: 100.0, y: 40.0, side: 200.0 };
        let mut raw = vec![0.0f32; LANDMARK_COUNT * 2];
        raw[36 * 2] = 0.25;
        raw[36 * 2 + 1] = 0.5;
        let points = decode_points(&raw, &crop).unwrap();
        assert_eq!(points.len(), LANDMARK_COUNT);
        assert_eq!(points[36], (150.0, 140.0));
    }

    #[test]
    fn test_decode_points_short_output() {
        let crop = SquareCrop { x: 0.0, y: 0.0, side: 1.0 };
        assert!(decode_points(&[0.0; 10], &crop).is_none());
    }

    #[test]
    fn test_eyes_from_68() {
        let points: Vec<(f32, f32)> = (0..68).map(|i| (i as f32, 0.0)).collect();
        let eyes = EyeLandmarks::from_68(&points).unwrap();
        assert_eq!(eyes.left[0].0, 36.0);
        assert_eq!(eyes.right[5].0, 47.0);
        assert!(EyeLandmarks::from_68(&points[..40]).is_none());
    }

    #[test]
    fn test_mean_ear() {
        let open = [(0.0, 0.0), (10.0, -6.0), (20.0, -6.0), (30.0, 0.0), (20.0, 6.0), (10.0, 6.0)];
        let closed = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (30.0, 0.0), (20.0, 0.0), (10.0, 0.0)];
        let eyes = EyeLandmarks { left: open, right: closed };
        assert!((eyes.mean_ear() - 0.2).abs() < 1e-5);
    }
}
