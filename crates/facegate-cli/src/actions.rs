//! Top-level commands: wire the real camera, models and terminal into the engine.

use crate::config::Config;
use crate::console::TerminalConsole;
use crate::engine::{EncodeSummary, Engine, EnrollOutcome, RecognizeOutcome, VerifyOutcome};
use anyhow::{Context, Result};
use facegate_core::{EncodingStore, Identity, OnnxAnalyzer};
use facegate_hw::Camera;
use std::path::Path;

fn engine(config: &Config) -> Result<Engine<'_, OnnxAnalyzer, TerminalConsole>> {
    let analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?
        .with_detection_confidence(config.detection_confidence);
    Ok(Engine::new(config, analyzer, TerminalConsole::new()))
}

pub fn enroll(config: &Config) -> Result<String> {
    let outcome = engine(config)?.enroll(&config.capture_device())?;
    Ok(match outcome {
        EnrollOutcome::Enrolled { name, samples } => {
            format!("Enrolled '{name}' with {samples} sample(s).")
        }
        EnrollOutcome::Cancelled => "Enrollment cancelled.".to_string(),
        EnrollOutcome::Failed { captured, required } => {
            format!("Enrollment failed: camera stopped after {captured} of {required} captures.")
        }
    })
}

pub fn verify(config: &Config) -> Result<String> {
    // Empty store: answer before the models or the camera are touched.
    if EncodingStore::load(&config.store_path)?.is_empty() {
        return Ok("No faces saved. Please add a face first.".to_string());
    }
    let outcome = engine(config)?.verify(&config.capture_device())?;
    Ok(match outcome {
        VerifyOutcome::NoData => "No faces saved. Please add a face first.".to_string(),
        VerifyOutcome::Identified(labels) => describe(&labels),
        VerifyOutcome::Cancelled => "Verification cancelled.".to_string(),
        VerifyOutcome::TimedOut { liveness_confirmed: false } => {
            "Verification timed out: liveness was not confirmed.".to_string()
        }
        VerifyOutcome::TimedOut { liveness_confirmed: true } => {
            "Verification timed out: no face recognized.".to_string()
        }
        VerifyOutcome::CameraClosed => "Camera stopped before verification finished.".to_string(),
    })
}

pub fn recognize(config: &Config) -> Result<String> {
    let outcome = engine(config)?.recognize(&config.capture_device())?;
    Ok(match outcome {
        RecognizeOutcome::NoData => "No faces saved. Please add a face first.".to_string(),
        RecognizeOutcome::Finished { frames_processed } => {
            format!("Recognition stopped after {frames_processed} frame(s).")
        }
    })
}

pub fn encode_dir(config: &Config, dir: &Path) -> Result<String> {
    let EncodeSummary { images, faces, skipped } = engine(config)?.encode_dir(dir)?;
    Ok(format!(
        "Encoded {faces} face(s) from {images} image(s), skipped {skipped}. Store: {}",
        config.store_path.display()
    ))
}

pub fn list(config: &Config) -> Result<String> {
    let store = EncodingStore::load(&config.store_path)?;
    if store.is_empty() {
        return Ok(format!("No faces saved in {}.", config.store_path.display()));
    }
    let mut out = format!("{} encoding(s) in {}:", store.len(), config.store_path.display());
    for (name, count) in store.name_counts() {
        out.push_str(&format!("\n  {name:<20} {count} sample(s)"));
    }
    Ok(out)
}

pub fn devices() -> String {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        return "No V4L2 capture devices found.".to_string();
    }
    devices
        .iter()
        .map(|d| format!("{:<14} {} ({}, {})", d.path, d.name, d.driver, d.bus))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(labels: &[Identity]) -> String {
    let names: Vec<&str> = labels.iter().map(Identity::label).collect();
    if labels.iter().any(Identity::is_known) {
        format!("Verified: {}", names.join(", "))
    } else {
        format!("Not recognized: {}", names.join(", "))
    }
}
