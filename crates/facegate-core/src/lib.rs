//! facegate-core: face enrollment and verification logic.
//!
//! Detection (SCRFD), encoding (ArcFace) and eye landmarks run on ONNX
//! Runtime. On top of them sit the liveness gates, the majority-vote
//! identity decision and the flat-file encoding store.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use liveness::{BlinkGate, Direction, FrameObservation, HeadTurnGate, LivenessGate};
pub use matcher::{identify, majority_name, Identity, MatchMetric, Matcher, ThresholdMatcher};
pub use store::{EncodingStore, StoreError};
pub use types::{BoundingBox, Embedding, GrayImage};
