use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ModelConfig {
    pub fn get_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_model_path().exists() {
            return Err(format!("model file not found: {:?}", self.get_model_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl LabelsConfig {
    pub fn get_labels_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_labels_path().exists() {
            return Err(format!(
                "labels file not found: {:?}",
                self.get_labels_path()
            ));
        }
        Ok(())
    }
}

/// Sampling policy for the video pipeline. Every `stride`-th frame is
/// resized to `resize_width` x `resize_height` and run through the detector
/// at `confidence_threshold`.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_stride")]
    pub stride: u32,
    #[serde(default = "default_resize_dim")]
    pub resize_width: i32,
    #[serde(default = "default_resize_dim")]
    pub resize_height: i32,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
}

fn default_stride() -> u32 {
    5
}

fn default_resize_dim() -> i32 {
    416
}

fn default_confidence() -> f32 {
    0.5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stride: default_stride(),
            resize_width: default_resize_dim(),
            resize_height: default_resize_dim(),
            confidence_threshold: default_confidence(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.stride == 0 {
            return Err("pipeline.stride must be a positive integer".into());
        }
        if self.resize_width <= 0 || self.resize_height <= 0 {
            return Err("pipeline resize dimensions must be positive".into());
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err("pipeline.confidence_threshold must be in (0, 1]".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u64,
    #[serde(default = "default_detection_fps")]
    pub detection_fps: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u64,
}

fn default_stream_fps() -> u64 {
    30
}

fn default_detection_fps() -> u64 {
    5
}

fn default_max_consecutive_failures() -> u64 {
    10
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.stream_fps)
    }

    pub fn get_detection_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.detection_fps)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_index: 0,
            stream_fps: default_stream_fps(),
            detection_fps: default_detection_fps(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("PPE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;

    for validation in [
        config.model.validate(),
        config.labels.validate(),
        config.pipeline.validate(),
    ] {
        if let Err(e) = validation {
            tracing::error!("configuration validation failed: {}", e);
            return Err(config::ConfigError::Message(e));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_match_sampling_policy() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.stride, 5);
        assert_eq!((cfg.resize_width, cfg.resize_height), (416, 416));
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pipeline_validation_rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.resize_width = -1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn camera_fps_converts_to_delay() {
        let cfg = CameraConfig {
            stream_fps: 30,
            detection_fps: 5,
            ..CameraConfig::default()
        };
        assert_eq!(cfg.get_stream_delay_ms(), 33);
        assert_eq!(cfg.get_detection_delay_ms(), 200);
    }
}
