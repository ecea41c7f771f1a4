use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Frames grabbed per second.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Frames per submitted window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Upper bound on in-flight prediction requests.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_directory")]
    pub directory: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            window_size: default_window_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tokio timers tick at millisecond granularity.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);
const MAX_FRAME_RATE: f64 = 1000.0;

impl CaptureConfig {
    /// Time between two capture ticks, never shorter than the timer
    /// resolution.
    pub fn frame_interval(&self) -> Duration {
        let secs = 1.0 / self.frame_rate;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs).max(MIN_FRAME_INTERVAL)
        } else {
            MIN_FRAME_INTERVAL
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "capture.frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.frame_rate > MAX_FRAME_RATE {
            return Err(ConfigError::Invalid(format!(
                "capture.frame_rate must be at most {MAX_FRAME_RATE}, got {}",
                self.frame_rate
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("capture.window_size must be at least 1".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "capture.max_concurrent_requests must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:5000".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_frame_rate() -> f64 {
    27.5
}
fn default_window_size() -> usize {
    110
}
fn default_max_concurrent_requests() -> usize {
    3
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_directory() -> String {
    "frames/".into()
}
fn default_width() -> u32 {
    320
}
fn default_height() -> u32 {
    240
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_normalize() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [camera]
            url = "http://cam.local/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.predictor.base_url, "http://localhost:5000");
        assert_eq!(config.capture.window_size, 110);
        assert_eq!(config.capture.max_concurrent_requests, 3);
        assert_eq!(config.camera.mode, "mjpeg");
        assert_eq!((config.camera.width, config.camera.height), (320, 240));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn frame_interval_follows_rate() {
        let capture = CaptureConfig {
            frame_rate: 25.0,
            ..CaptureConfig::default()
        };
        assert_eq!(capture.frame_interval(), Duration::from_millis(40));
    }

    #[test]
    fn zero_window_rejected() {
        let result = Config::from_toml(
            r#"
            [capture]
            window_size = 0
            [camera]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn extreme_frame_rate_rejected() {
        let capture = CaptureConfig {
            frame_rate: 1e10,
            ..CaptureConfig::default()
        };
        assert!(matches!(capture.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(capture.frame_interval(), Duration::from_millis(1));

        let fastest = CaptureConfig {
            frame_rate: 1000.0,
            ..CaptureConfig::default()
        };
        assert!(fastest.validate().is_ok());
        assert_eq!(fastest.frame_interval(), Duration::from_millis(1));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let capture = CaptureConfig {
            max_concurrent_requests: 0,
            ..CaptureConfig::default()
        };
        assert!(capture.validate().is_err());
    }

    #[test]
    fn missing_camera_section_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[capture]\nframe_rate = 10.0\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
