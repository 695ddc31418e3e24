use facegate_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use facegate_core::liveness::{
    DEFAULT_BLINK_CONSECUTIVE_FRAMES, DEFAULT_EAR_THRESHOLD, DEFAULT_HEAD_TURN_THRESHOLD_PX,
};
use facegate_core::{MatchMetric, ThresholdMatcher};
use facegate_hw::V4l2Device;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Which liveness challenge verification asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessMode {
    HeadTurn,
    Blink,
}

/// How enrollment collects samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollMode {
    /// Three manual captures: straight, turned right, turned left.
    Guided,
    /// One automatic capture right after a blink.
    Blink,
}

/// Application configuration: defaults, then an optional TOML file, then `FACEGATE_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory holding the ONNX models.
    pub model_dir: PathBuf,
    /// Minimum detector score for a face to count.
    pub detection_confidence: f32,
    /// Encoding store file.
    pub store_path: PathBuf,
    pub match_metric: MatchMetric,
    /// Cosine similarity floor, or Euclidean distance ceiling.
    pub match_threshold: f32,
    pub liveness: LivenessMode,
    pub head_turn_threshold_px: f32,
    pub ear_threshold: f32,
    pub blink_consecutive_frames: u32,
    /// Run recognition on every Nth frame once liveness is confirmed.
    pub verify_every_n_frames: u32,
    pub verify_timeout_secs: u64,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    pub enroll_mode: EnrollMode,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            model_dir: data_dir.join("models"),
            detection_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            store_path: data_dir.join("encodings.json"),
            match_metric: MatchMetric::Cosine,
            match_threshold: 0.40,
            liveness: LivenessMode::HeadTurn,
            head_turn_threshold_px: DEFAULT_HEAD_TURN_THRESHOLD_PX,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            blink_consecutive_frames: DEFAULT_BLINK_CONSECUTIVE_FRAMES,
            verify_every_n_frames: 4,
            verify_timeout_secs: 30,
            warmup_frames: 4,
            enroll_mode: EnrollMode::Guided,
        }
    }
}

impl Config {
    /// Load from `explicit`, else `$FACEGATE_CONFIG`, else the XDG config file if present.
    /// Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEGATE_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = config_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override fields from `FACEGATE_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        set_parsed(&mut self.frame_width, &lookup, "FACEGATE_FRAME_WIDTH");
        set_parsed(&mut self.frame_height, &lookup, "FACEGATE_FRAME_HEIGHT");
        set_parsed(&mut self.detection_confidence, &lookup, "FACEGATE_DETECTION_CONFIDENCE");
        set_parsed(&mut self.match_threshold, &lookup, "FACEGATE_MATCH_THRESHOLD");
        set_parsed(
            &mut self.head_turn_threshold_px,
            &lookup,
            "FACEGATE_HEAD_TURN_THRESHOLD_PX",
        );
        set_parsed(&mut self.ear_threshold, &lookup, "FACEGATE_EAR_THRESHOLD");
        set_parsed(
            &mut self.blink_consecutive_frames,
            &lookup,
            "FACEGATE_BLINK_CONSECUTIVE_FRAMES",
        );
        set_parsed(
            &mut self.verify_every_n_frames,
            &lookup,
            "FACEGATE_VERIFY_EVERY_N_FRAMES",
        );
        set_parsed(&mut self.verify_timeout_secs, &lookup, "FACEGATE_VERIFY_TIMEOUT_SECS");
        set_parsed(&mut self.warmup_frames, &lookup, "FACEGATE_WARMUP_FRAMES");

        if let Some(v) = lookup("FACEGATE_LIVENESS") {
            match v.as_str() {
                "head-turn" => self.liveness = LivenessMode::HeadTurn,
                "blink" => self.liveness = LivenessMode::Blink,
                other => tracing::warn!(value = other, "ignoring unknown FACEGATE_LIVENESS"),
            }
        }
        if let Some(v) = lookup("FACEGATE_ENROLL_MODE") {
            match v.as_str() {
                "guided" => self.enroll_mode = EnrollMode::Guided,
                "blink" => self.enroll_mode = EnrollMode::Blink,
                other => tracing::warn!(value = other, "ignoring unknown FACEGATE_ENROLL_MODE"),
            }
        }
        if let Some(v) = lookup("FACEGATE_MATCH_METRIC") {
            match v.as_str() {
                "cosine" => self.match_metric = MatchMetric::Cosine,
                "euclidean" => self.match_metric = MatchMetric::Euclidean,
                other => tracing::warn!(value = other, "ignoring unknown FACEGATE_MATCH_METRIC"),
            }
        }
    }

    pub fn matcher(&self) -> ThresholdMatcher {
        ThresholdMatcher::new(self.match_metric, self.match_threshold)
    }

    pub fn capture_device(&self) -> V4l2Device {
        V4l2Device {
            path: self.camera_device.clone(),
            width: self.frame_width,
            height: self.frame_height,
            warmup_frames: self.warmup_frames,
        }
    }
}

fn set_parsed<T: std::str::FromStr>(
    field: &mut T,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *field = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("facegate")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("facegate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.liveness, LivenessMode::HeadTurn);
        assert_eq!(config.enroll_mode, EnrollMode::Guided);
        assert_eq!(config.verify_every_n_frames, 4);
        assert_eq!(config.head_turn_threshold_px, 50.0);
        assert!(config.store_path.ends_with("facegate/encodings.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "camera_device = \"/dev/video4\"\n",
                "liveness = \"blink\"\n",
                "match_metric = \"euclidean\"\n",
                "match_threshold = 0.6\n",
                "detection_confidence = 0.7\n",
            ),
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.liveness, LivenessMode::Blink);
        assert_eq!(config.match_metric, MatchMetric::Euclidean);
        assert_eq!(config.matcher().threshold, 0.6);
        assert_eq!(config.detection_confidence, 0.7);
        assert_eq!(config.frame_width, 640);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "camera = 3\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FACEGATE_STORE_PATH", "/tmp/faces.json"),
            ("FACEGATE_VERIFY_EVERY_N_FRAMES", "2"),
            ("FACEGATE_EAR_THRESHOLD", "not-a-number"),
            ("FACEGATE_LIVENESS", "blink"),
            ("FACEGATE_ENROLL_MODE", "blink"),
            ("FACEGATE_DETECTION_CONFIDENCE", "0.65"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.store_path, PathBuf::from("/tmp/faces.json"));
        assert_eq!(config.verify_every_n_frames, 2);
        assert_eq!(config.ear_threshold, DEFAULT_EAR_THRESHOLD);
        assert_eq!(config.liveness, LivenessMode::Blink);
        assert_eq!(config.enroll_mode, EnrollMode::Blink);
        assert_eq!(config.detection_confidence, 0.65);
    }

    #[test]
    fn test_unknown_enroll_mode_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "FACEGATE_ENROLL_MODE").then(|| "sideways".to_string()));
        assert_eq!(config.enroll_mode, EnrollMode::Guided);
    }
}
