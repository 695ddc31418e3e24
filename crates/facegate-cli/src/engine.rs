//! Enrollment, verification and recognition flows.
//!
//! Every flow is a synchronous frame-by-frame loop: read a frame, check for
//! a key press, run the models, compare against thresholds. The camera is
//! opened for one flow and released when it returns.

use crate::config::{Config, EnrollMode, LivenessMode};
use crate::console::{Console, Key};
use facegate_core::{
    identify, AnalyzerError, BlinkGate, Direction, EncodingStore, FaceAnalyzer, FrameObservation,
    GrayImage, HeadTurnGate, Identity, LivenessGate, Matcher, StoreError,
};
use facegate_hw::{CameraError, CaptureDevice, Frame, FrameSource};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Instructions for the three guided enrollment captures.
pub const GUIDED_STEPS: [&str; 3] = [
    "1. Look STRAIGHT at the camera.",
    "2. Slowly turn your head to the RIGHT.",
    "3. Slowly turn your head to the LEFT.",
];

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("{0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("console error: {0}")]
    Console(#[from] std::io::Error),
    #[error("blink liveness needs the 68-point landmark model")]
    BlinkUnavailable,
    #[error("cannot read image directory {path}: {source}")]
    ImageDir {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled { name: String, samples: usize },
    Cancelled,
    /// The camera stopped before every capture was taken.
    Failed { captured: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The store holds no encodings; the camera was never opened.
    NoData,
    Identified(Vec<Identity>),
    Cancelled,
    TimedOut { liveness_confirmed: bool },
    CameraClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizeOutcome {
    NoData,
    Finished { frames_processed: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    pub images: usize,
    pub faces: usize,
    pub skipped: usize,
}

/// Result of a capture loop that may be cut short.
enum Capture {
    Done(Vec<Vec<f32>>),
    Ended(Vec<Vec<f32>>),
    Cancelled,
}

pub struct Engine<'a, A, C> {
    config: &'a Config,
    analyzer: A,
    console: C,
}

impl<'a, A: FaceAnalyzer, C: Console> Engine<'a, A, C> {
    pub fn new(config: &'a Config, analyzer: A, console: C) -> Self {
        Self {
            config,
            analyzer,
            console,
        }
    }

    /// Ask for a name, capture samples, append them to the store.
    pub fn enroll<D: CaptureDevice>(
        &mut self,
        device: &D,
    ) -> Result<EnrollOutcome, EngineError> {
        let mode = self.config.enroll_mode;
        if mode == EnrollMode::Blink && !self.analyzer.supports_blink() {
            return Err(EngineError::BlinkUnavailable);
        }

        let name = match self.console.prompt_name()? {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                self.console.warn("Name input was cancelled or empty.");
                return Ok(EnrollOutcome::Cancelled);
            }
        };

        let required = match mode {
            EnrollMode::Guided => GUIDED_STEPS.len(),
            EnrollMode::Blink => 1,
        };
        let capture = device.with_source(|source| match mode {
            EnrollMode::Guided => self.capture_guided(source),
            EnrollMode::Blink => self.capture_after_blink(source),
        })??;

        let captured = match capture {
            Capture::Cancelled => {
                self.console.warn("Enrollment cancelled.");
                return Ok(EnrollOutcome::Cancelled);
            }
            Capture::Ended(captured) | Capture::Done(captured) => captured,
        };
        if captured.len() < required {
            self.console.warn("Enrollment failed. Please try again.");
            return Ok(EnrollOutcome::Failed {
                captured: captured.len(),
                required,
            });
        }

        let store_path = &self.config.store_path;
        let mut store = EncodingStore::load(store_path)?;
        let samples = captured.len();
        for encoding in captured {
            store.push(&name, encoding)?;
        }
        store.save(store_path)?;

        tracing::info!(name = %name, samples, "enrolled");
        self.console.info(&format!("Enrollment complete for '{name}'."));
        Ok(EnrollOutcome::Enrolled { name, samples })
    }

    /// Check liveness, then identify the faces in front of the camera.
    pub fn verify<D: CaptureDevice>(
        &mut self,
        device: &D,
    ) -> Result<VerifyOutcome, EngineError> {
        let store = EncodingStore::load(&self.config.store_path)?;
        if store.is_empty() {
            self.console.warn("No faces saved. Please add a face first.");
            return Ok(VerifyOutcome::NoData);
        }

        let mut gate = self.liveness_gate()?;
        self.console.info(&format!("Liveness check: {}", gate.instruction()));
        let matcher = self.config.matcher();

        device.with_source(|source| self.verify_loop(source, &store, &mut gate, &matcher))?
    }

    /// Identify faces continuously, reporting whenever the labels change.
    pub fn recognize<D: CaptureDevice>(
        &mut self,
        device: &D,
    ) -> Result<RecognizeOutcome, EngineError> {
        let store = EncodingStore::load(&self.config.store_path)?;
        if store.is_empty() {
            self.console.warn("No faces saved. Please add a face first.");
            return Ok(RecognizeOutcome::NoData);
        }
        let matcher = self.config.matcher();
        let every_n = self.config.verify_every_n_frames.max(1) as usize;

        device.with_source(|source| -> Result<RecognizeOutcome, EngineError> {
            let mut frame_count = 0usize;
            let mut processed = 0usize;
            let mut last: Option<Vec<Identity>> = None;

            while let Some(frame) = next_frame(source) {
                if self.console.poll_key()? == Some(Key::Quit) {
                    break;
                }
                frame_count += 1;
                if frame.is_dark || frame_count % every_n != 0 {
                    continue;
                }
                processed += 1;

                let labels = self.identify_all(&view(&frame), &store, &matcher)?;
                if last.as_ref() != Some(&labels) {
                    self.console.show_labels(&labels);
                    last = Some(labels);
                }
            }
            Ok(RecognizeOutcome::Finished {
                frames_processed: processed,
            })
        })?
    }

    /// Rebuild the store from a directory of images, one person per file stem.
    pub fn encode_dir(&mut self, dir: &Path) -> Result<EncodeSummary, EngineError> {
        let dir_err = |source| EngineError::ImageDir {
            path: dir.display().to_string(),
            source,
        };
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(dir_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        let mut store = EncodingStore::default();
        let mut summary = EncodeSummary::default();

        for path in paths {
            let stem = path.file_stem().and_then(|s| s.to_str());
            let Some(name) = stem.map(str::to_string) else {
                summary.skipped += 1;
                continue;
            };
            let gray = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable image"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            self.console.info(&format!("Processing image: {} for {name}", path.display()));
            let image = GrayImage::new(gray.as_raw(), gray.width(), gray.height());
            let faces = self.analyzer.detect(&image)?;
            if faces.is_empty() {
                tracing::warn!(path = %path.display(), "no face found");
            }
            for face in &faces {
                let encoding = self.analyzer.encode(&image, face)?;
                store.push(&name, encoding.values)?;
                summary.faces += 1;
            }
            summary.images += 1;
        }

        store.save(&self.config.store_path)?;
        self.console.info(&format!(
            "Finished processing. {} faces encoded and saved to {}",
            store.len(),
            self.config.store_path.display()
        ));
        Ok(summary)
    }

    fn liveness_gate(&self) -> Result<LivenessGate, EngineError> {
        Ok(match self.config.liveness {
            LivenessMode::HeadTurn => LivenessGate::HeadTurn(HeadTurnGate::new(
                Direction::random(),
                self.config.head_turn_threshold_px,
            )),
            LivenessMode::Blink => {
                if !self.analyzer.supports_blink() {
                    return Err(EngineError::BlinkUnavailable);
                }
                LivenessGate::Blink(BlinkGate::new(
                    self.config.ear_threshold,
                    self.config.blink_consecutive_frames,
                ))
            }
        })
    }

    fn capture_guided(&mut self, source: &mut dyn FrameSource) -> Result<Capture, EngineError> {
        let mut captured = Vec::with_capacity(GUIDED_STEPS.len());

        for step in GUIDED_STEPS {
            self.console.info(&format!("{step} Press 's' to capture, 'q' to quit."));
            loop {
                let Some(frame) = next_frame(source) else {
                    return Ok(Capture::Ended(captured));
                };
                match self.console.poll_key()? {
                    Some(Key::Quit) => return Ok(Capture::Cancelled),
                    Some(Key::Capture) => {}
                    _ => continue,
                }

                let image = view(&frame);
                let faces = self.analyzer.detect(&image)?;
                match faces.as_slice() {
                    [face] => {
                        captured.push(self.analyzer.encode(&image, face)?.values);
                        self.console.info(&format!(
                            "Capture successful! ({}/{})",
                            captured.len(),
                            GUIDED_STEPS.len()
                        ));
                        break;
                    }
                    _ => self.warn_face_count(faces.len()),
                }
            }
        }
        Ok(Capture::Done(captured))
    }

    fn capture_after_blink(
        &mut self,
        source: &mut dyn FrameSource,
    ) -> Result<Capture, EngineError> {
        let mut gate = BlinkGate::new(
            self.config.ear_threshold,
            self.config.blink_consecutive_frames,
        );
        self.console.info("Look at the camera and blink. Press 'q' to quit.");
        // warn on changes only, not on every frame
        let mut last_count = 1;

        while let Some(frame) = next_frame(source) {
            if self.console.poll_key()? == Some(Key::Quit) {
                return Ok(Capture::Cancelled);
            }
            let image = view(&frame);
            let faces = self.analyzer.detect(&image)?;
            if faces.len() != last_count {
                last_count = faces.len();
                if last_count != 1 {
                    self.warn_face_count(last_count);
                }
            }
            let [face] = faces.as_slice() else {
                gate.observe(None);
                continue;
            };

            let ear = self.analyzer.eye_aspect_ratio(&image, face)?;
            if gate.observe(Some(ear)) {
                let encoding = self.analyzer.encode(&image, face)?;
                self.console.info("Blink detected, face captured.");
                return Ok(Capture::Done(vec![encoding.values]));
            }
        }
        Ok(Capture::Ended(Vec::new()))
    }

    fn verify_loop<M: Matcher>(
        &mut self,
        source: &mut dyn FrameSource,
        store: &EncodingStore,
        gate: &mut LivenessGate,
        matcher: &M,
    ) -> Result<VerifyOutcome, EngineError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.verify_timeout_secs);
        let every_n = self.config.verify_every_n_frames.max(1) as usize;
        let mut frame_count = 0usize;

        loop {
            if Instant::now() >= deadline {
                self.console.warn("Verification timed out.");
                return Ok(VerifyOutcome::TimedOut {
                    liveness_confirmed: gate.is_confirmed(),
                });
            }
            let Some(frame) = next_frame(source) else {
                return Ok(VerifyOutcome::CameraClosed);
            };
            if self.console.poll_key()? == Some(Key::Quit) {
                return Ok(VerifyOutcome::Cancelled);
            }
            if frame.is_dark {
                continue;
            }
            let image = view(&frame);

            if !gate.is_confirmed() {
                let obs = self.observe(&image, gate.needs_eye_landmarks())?;
                if gate.observe(obs) {
                    tracing::info!(frame = frame.sequence, "liveness confirmed");
                    self.console.info("Liveness confirmed!");
                }
                continue;
            }

            frame_count += 1;
            if frame_count % every_n != 0 {
                continue;
            }
            let labels = self.identify_all(&image, store, matcher)?;
            if !labels.is_empty() {
                self.console.show_labels(&labels);
                return Ok(VerifyOutcome::Identified(labels));
            }
        }
    }

    fn warn_face_count(&mut self, count: usize) {
        if count == 0 {
            self.console.warn("No face detected. Please position yourself clearly.");
        } else {
            self.console
                .warn("Multiple faces detected. Please ensure only one person is in the frame.");
        }
    }

    /// Face center and eye openness of the most confident face.
    fn observe(
        &mut self,
        image: &GrayImage<'_>,
        with_eyes: bool,
    ) -> Result<FrameObservation, EngineError> {
        let faces = self.analyzer.detect(image)?;
        let Some(face) = faces.first() else {
            return Ok(FrameObservation::default());
        };
        let ear = if with_eyes {
            Some(self.analyzer.eye_aspect_ratio(image, face)?)
        } else {
            None
        };
        Ok(FrameObservation {
            center_x: Some(face.center_x()),
            ear,
        })
    }

    fn identify_all<M: Matcher>(
        &mut self,
        image: &GrayImage<'_>,
        store: &EncodingStore,
        matcher: &M,
    ) -> Result<Vec<Identity>, EngineError> {
        let faces = self.analyzer.detect(image)?;
        let mut labels = Vec::with_capacity(faces.len());
        for face in &faces {
            let encoding = self.analyzer.encode(image, face)?;
            if let Some(expected) = store.dim().filter(|&d| d != encoding.dim()) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: encoding.dim(),
                }
                .into());
            }
            labels.push(identify(matcher, &encoding, store));
        }
        Ok(labels)
    }
}

/// Next frame, treating a read failure as the end of the stream.
fn next_frame(source: &mut dyn FrameSource) -> Option<Frame> {
    match source.next_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "camera read failed, stopping");
            None
        }
    }
}

fn view(frame: &Frame) -> GrayImage<'_> {
    GrayImage::new(&frame.data, frame.width, frame.height)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
