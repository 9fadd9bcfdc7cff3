use rollcall_core::session::{DEFAULT_DOWNSCALE, DEFAULT_MAX_CONSECUTIVE_VISION_ERRORS};
use rollcall_core::{MatchMetric, Matcher, RosterEntry, SessionOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_WARMUP_FRAMES: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk layout of `rollcall.toml`. Every scalar is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    metric: Option<MatchMetric>,
    threshold: Option<f32>,
    downscale: Option<u32>,
    warmup_frames: Option<usize>,
    max_consecutive_vision_errors: Option<usize>,
    #[serde(rename = "student")]
    students: Vec<RosterEntry>,
}

/// Resolved configuration: file values, then `ROLLCALL_*` overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where attendance logs are written (default: next to the config file).
    pub output_dir: PathBuf,
    pub metric: MatchMetric,
    /// Metric-specific threshold; `None` uses the metric's default.
    pub threshold: Option<f32>,
    pub downscale: u32,
    /// Frames discarded after the stream starts (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    pub max_consecutive_vision_errors: usize,
    /// Roster in file order, image paths resolved against the config directory.
    pub roster: Vec<RosterEntry>,
}

impl Config {
    /// Load `path` and apply overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_toml(&text, &base_dir, |key| std::env::var(key).ok()).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn from_toml(
        text: &str,
        base_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;

        let roster = file
            .students
            .into_iter()
            .map(|entry| RosterEntry {
                image: base_dir.join(&entry.image),
                ..entry
            })
            .collect();

        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir.map(|dir| base_dir.join(dir)))
            .unwrap_or_else(rollcall_vision::default_model_dir);

        let output_dir = env("ROLLCALL_OUTPUT_DIR")
            .map(PathBuf::from)
            .or(file.output_dir.map(|dir| base_dir.join(dir)))
            .unwrap_or_else(|| base_dir.to_path_buf());

        Ok(Self {
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            model_dir,
            output_dir,
            metric: env_parse(&env, "ROLLCALL_METRIC")
                .or(file.metric)
                .unwrap_or_default(),
            threshold: env_parse(&env, "ROLLCALL_THRESHOLD").or(file.threshold),
            downscale: env_parse(&env, "ROLLCALL_DOWNSCALE")
                .or(file.downscale)
                .unwrap_or(DEFAULT_DOWNSCALE),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(DEFAULT_WARMUP_FRAMES),
            max_consecutive_vision_errors: file
                .max_consecutive_vision_errors
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_VISION_ERRORS),
            roster,
        })
    }

    pub fn matcher(&self) -> Box<dyn Matcher> {
        self.metric.matcher(self.threshold)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            downscale: self.downscale,
            max_consecutive_vision_errors: self.max_consecutive_vision_errors,
        }
    }
}

/// Parse an override, ignoring (with a warning) values that don't parse.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
camera_device = "/dev/video2"
metric = "euclidean"
threshold = 0.55

[[student]]
name = "Ada Lovelace"
image = "faces/ada.jpg"

[[student]]
name = "Alan Turing"
image = "/srv/faces/alan.jpeg"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_file_values_and_defaults() {
        let config = Config::from_toml(SAMPLE, Path::new("/class"), no_env).unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.metric, MatchMetric::Euclidean);
        assert_eq!(config.threshold, Some(0.55));
        assert_eq!(config.downscale, 4);
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.max_consecutive_vision_errors, 10);
        assert_eq!(config.output_dir, PathBuf::from("/class"));
    }

    #[test]
    fn test_roster_order_and_relative_paths() {
        let config = Config::from_toml(SAMPLE, Path::new("/class"), no_env).unwrap();
        assert_eq!(
            config.roster,
            vec![
                RosterEntry::new("Ada Lovelace", "/class/faces/ada.jpg"),
                RosterEntry::new("Alan Turing", "/srv/faces/alan.jpeg"),
            ]
        );
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = Config::from_toml("", Path::new("."), no_env).unwrap();
        assert!(config.roster.is_empty());
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.metric, MatchMetric::Cosine);
        assert_eq!(config.threshold, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video9"),
            ("ROLLCALL_METRIC", "cosine"),
            ("ROLLCALL_THRESHOLD", "0.3"),
            ("ROLLCALL_DOWNSCALE", "2"),
            ("ROLLCALL_OUTPUT_DIR", "/var/attendance"),
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());
        let config = Config::from_toml(SAMPLE, Path::new("/class"), lookup).unwrap();

        assert_eq!(config.camera_device, "/dev/video9");
        assert_eq!(config.metric, MatchMetric::Cosine);
        assert_eq!(config.threshold, Some(0.3));
        assert_eq!(config.downscale, 2);
        assert_eq!(config.output_dir, PathBuf::from("/var/attendance"));
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_bad_env_value_falls_back() {
        let lookup = |key: &str| (key == "ROLLCALL_WARMUP_FRAMES").then(|| "lots".to_string());
        let config = Config::from_toml("warmup_frames = 7", Path::new("."), lookup).unwrap();
        assert_eq!(config.warmup_frames, 7);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("camera = \"/dev/video0\"", Path::new("."), no_env).is_err());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(Config::from_toml("metric = \"manhattan\"", Path::new("."), no_env).is_err());
    }

    #[test]
    fn test_session_options_follow_config() {
        let config = Config::from_toml(
            "downscale = 1\nmax_consecutive_vision_errors = 3",
            Path::new("."),
            no_env,
        )
        .unwrap();
        let options = config.session_options();
        assert_eq!(options.downscale, 1);
        assert_eq!(options.max_consecutive_vision_errors, 3);
    }

    #[test]
    fn test_load_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "[[student]]\nname = \"Ada\"\nimage = \"ada.jpg\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.roster[0].image, dir.path().join("ada.jpg"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/rollcall.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
