//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides, followed by NMS. Frames are
//! letterboxed into the square model input and detections are mapped back
//! to frame coordinates.

use crate::types::{BoundingBox, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-input coordinates to frame coordinates.
    fn to_frame(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// Frame coordinates to model-input coordinates.
    fn to_input(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }
}

/// Raw output slices for one stride.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    /// Output indices (score, bbox, kps) per stride, resolved at load time.
    output_map: [(usize, usize, usize); 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }
        let output_map = resolve_outputs(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?output_map,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            output_map,
        })
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &GrayImage<'_>) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width == 0 || image.height == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(image.width, image.height, SCRFD_INPUT_SIZE);
        let input = preprocess(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.output_map[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode(&level, &letterbox, self.confidence_threshold));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(faces = faces.len(), "detection done");
        Ok(faces)
    }
}

/// Letterbox a grayscale frame into a normalized NCHW tensor (gray replicated to 3 channels).
fn preprocess(image: &GrayImage<'_>, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE;
    let (x_end, y_end) = letterbox.to_input((image.width as f32, image.height as f32));

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let (fx, fy) = (x as f32, y as f32);
            let inside = fx >= letterbox.pad_x && fx < x_end && fy >= letterbox.pad_y && fy < y_end;
            let value = if inside {
                let (sx, sy) = letterbox.to_frame((fx + 0.5, fy + 0.5));
                (image.sample(sx - 0.5, sy - 0.5) - SCRFD_MEAN) / SCRFD_STD
            } else {
                0.0
            };
            for c in 0..3 {
                tensor[[0, c, y, x]] = value;
            }
        }
    }
    tensor
}

/// Map output names like `score_8` / `bbox_16` / `kps_32` to indices.
///
/// Exports with generic tensor names use the standard positional layout:
/// scores 0..3, bboxes 3..6, kps 6..9.
fn resolve_outputs(names: &[String]) -> [(usize, usize, usize); 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut map = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => map[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD outputs not named, using positional layout");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    map
}

/// Decode one stride level into frame-space boxes above `threshold`.
fn decode(level: &StrideOutputs<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / level.stride;
    let stride = level.stride as f32;

    level
        .scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor = ((cell % grid_w) as f32 * stride, (cell / grid_w) as f32 * stride);

            let d = level.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame((anchor.0 - d[0] * stride, anchor.1 - d[1] * stride));
            let (x2, y2) = letterbox.to_frame((anchor.0 + d[2] * stride, anchor.1 + d[3] * stride));

            let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_frame((
                        anchor.0 + k[i * 2] * stride,
                        anchor.1 + k[i * 2 + 1] * stride,
                    ))
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = nms(
            vec![
                make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confidences: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        let (x, y) = lb.to_frame(lb.to_input((100.0, 50.0)));
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_resolve_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(resolve_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_resolve_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(resolve_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let stride = 32usize;
        let grid_w = SCRFD_INPUT_SIZE / stride;
        let cells = grid_w * grid_w * SCRFD_ANCHORS_PER_CELL;

        // anchor index for cell (x=2, y=3), first anchor in the cell
        let idx = (3 * grid_w + 2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0f32; cells * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let kps = vec![0.0f32; cells * 10];

        let level = StrideOutputs { stride, scores: &scores, bboxes: &bboxes, kps: &kps };
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let faces = decode(&level, &lb, 0.5);

        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!((face.x, face.y, face.width, face.height), (32.0, 64.0, 64.0, 64.0));
        assert_eq!(face.landmarks.unwrap()[0], (64.0, 96.0));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = vec![255u8; 320 * 240];
        let image = GrayImage::new(&frame, 320, 240);
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        let tensor = preprocess(&image, &lb);

        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // top padding band
        assert_eq!(tensor[[0, 0, 10, 320]], 0.0);
        // image interior
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 1, 320, 320]] - expected).abs() < 1e-4);
    }
}
