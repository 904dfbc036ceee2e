use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gradcam::colormap::Colormap;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub gradcam: GradcamConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub static_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// TorchScript export of the classifier.
    pub path: PathBuf,
    pub input_size: u32,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    /// Scripted method returning the last convolutional feature maps.
    pub feature_method: String,
    /// Scripted method mapping those feature maps to logits.
    pub head_method: String,
    pub use_cuda: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/brain_tumor_classifier.pt"),
            input_size: 224,
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
            feature_method: "features".to_string(),
            head_method: "head".to_string(),
            use_cuda: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradcamConfig {
    pub colormap: Colormap,
    pub alpha: f32,
}

impl Default for GradcamConfig {
    fn default() -> Self {
        Self {
            colormap: Colormap::Jet,
            alpha: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Files older than this are swept. `None` keeps everything.
    pub max_age_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: None,
            sweep_interval_secs: 3600,
        }
    }
}

impl ServiceConfig {
    /// Loads the YAML config (if any), applies environment overrides and validates.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = Self::config_path();
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok((config, path))
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SERVICE_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let candidate = match std::env::var("CARGO_MANIFEST_DIR") {
            Ok(manifest_dir) => PathBuf::from(format!("{}/../config/service.yaml", manifest_dir)),
            Err(_) => PathBuf::from("config/service.yaml"),
        };
        candidate.exists().then_some(candidate)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(model_path);
        }
        if let Some(static_dir) = lookup("STATIC_DIR") {
            self.storage.static_dir = PathBuf::from(static_dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_upload_bytes must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gradcam.alpha) {
            return Err(ConfigError::Invalid(format!(
                "gradcam.alpha must be within [0, 1], got {}",
                self.gradcam.alpha
            )));
        }
        if self.model.input_size == 0 {
            return Err(ConfigError::Invalid("model.input_size must be non-zero".into()));
        }
        if self.model.mean.len() != 3 || self.model.std.len() != 3 {
            return Err(ConfigError::Invalid(
                "model.mean and model.std need one value per RGB channel".into(),
            ));
        }
        if self.model.std.iter().any(|s| *s == 0.0) {
            return Err(ConfigError::Invalid("model.std must not contain zero".into()));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention.sweep_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
