use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_device_index")]
    pub device_index: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Upper bound on open + configure + read. Unset means wait forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_cascade_path")]
    pub cascade_path: PathBuf,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: i32,
    #[serde(default = "default_min_area")]
    pub min_area: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// tessdata directory; the Tesseract default search path is used when unset.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    #[serde(default)]
    pub char_whitelist: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_plates_dir")]
    pub plates_dir: PathBuf,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// When set, the frame with plate markers drawn on it is kept here.
    #[serde(default)]
    pub annotated_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: default_device_index(),
            width: default_width(),
            height: default_height(),
            timeout_ms: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cascade_path: default_cascade_path(),
            scale_factor: default_scale_factor(),
            min_neighbors: default_min_neighbors(),
            min_area: default_min_area(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            data_path: None,
            char_whitelist: None,
            timeout_ms: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            plates_dir: default_plates_dir(),
            static_dir: default_static_dir(),
            annotated_dir: None,
        }
    }
}

impl Default for ServerConfig {
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

impl CameraConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Tesseract language string, e.g. `eng+deu`.
    pub fn language_spec(&self) -> String {
        self.languages.join("+")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.detector.scale_factor <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "detector.scale_factor must be greater than 1.0, got {}",
                self.detector.scale_factor
            )));
        }
        if self.detector.min_neighbors < 0 {
            return Err(ConfigError::Invalid(format!(
                "detector.min_neighbors must not be negative, got {}",
                self.detector.min_neighbors
            )));
        }
        if self.ocr.languages.is_empty() {
            return Err(ConfigError::Invalid(
                "ocr.languages must name at least one language".into(),
            ));
        }
        Ok(())
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
fn default_device_index() -> i32 {
    1
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_cascade_path() -> PathBuf {
    PathBuf::from("model/haarcascade_russian_plate_number.xml")
}
fn default_scale_factor() -> f64 {
    1.1
}
fn default_min_neighbors() -> i32 {
    4
}
fn default_min_area() -> u64 {
    500
}
fn default_languages() -> Vec<String> {
    vec!["eng".into()]
}
fn default_plates_dir() -> PathBuf {
    PathBuf::from("static/plates")
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_bind() -> String {
    "127.0.0.1:5000".into()
}
fn default_log_level() -> String {
    "info".into()
}
