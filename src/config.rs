//! Service configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file) is a valid configuration. Command-line flags in the server binary
//! override individual values after loading.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engines::worker::WorkerCommand;
use crate::model::Device;
use crate::pipeline::DEFAULT_MAX_TEXT_CHARS;
use crate::speaker::UploadPolicy;

/// Multilingual voice-cloning model loaded when none is configured.
pub const DEFAULT_MODEL_NAME: &str = "tts_models/multilingual/multi-dataset/your_tts";

/// Reference worker shipped with the crate, relative to the repository root.
pub const DEFAULT_WORKER_SCRIPT: &str = "worker/tts_worker.py";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub speaker: SpeakerConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub ui: UiConfig,
}

/// Which model to load and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Pre-trained model identifier passed to the engine.
    pub name: String,
    /// Compute device, consulted once at load.
    pub device: Device,
    /// Restrict accepted languages to this list. `None` accepts everything
    /// the model reports.
    pub languages: Option<Vec<String>>,
    /// Command that starts the model worker.
    pub worker: WorkerCommand,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL_NAME.to_string(),
            device: Device::Cpu,
            languages: None,
            worker: WorkerCommand::new("python3").arg(DEFAULT_WORKER_SCRIPT),
        }
    }
}

/// Speaker reference resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Recorded voice used when a request has no upload.
    pub default_voice: Option<PathBuf>,
    pub upload_policy: UploadPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where uploads and generated audio are written. System temp dir if unset.
    pub output_dir: Option<PathBuf>,
    pub max_text_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Maximum request body size, uploads included.
    pub max_upload_bytes: usize,
    /// Bound on in-flight synthesis requests. Unbounded if unset.
    pub max_concurrent_requests: Option<usize>,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7860)),
            max_upload_bytes: 16 * 1024 * 1024,
            max_concurrent_requests: None,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Web UI text and defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub title: String,
    pub description: String,
    pub placeholder: String,
    /// Language used when the UI form does not send one.
    pub default_language: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            title: "YourTTS Voice Cloning TTS".to_string(),
            description: "Enter the text you want to synthesize. Optionally, upload a short WAV \
                          file of a reference speaker to clone their voice."
                .to_string(),
            placeholder: "Enter your text (Hinglish: Hindi + English)...".to_string(),
            default_language: "en".to_string(),
        }
    }
}

impl AppConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.name must not be empty".into()));
        }
        if self.model.worker.program.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "model.worker.program must not be empty".into(),
            ));
        }
        if matches!(&self.model.languages, Some(langs) if langs.is_empty()) {
            return Err(ConfigError::Invalid(
                "model.languages must list at least one language".into(),
            ));
        }
        if self.pipeline.max_text_chars == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_text_chars must be > 0".into(),
            ));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_upload_bytes must be > 0".into(),
            ));
        }
        if self.server.max_concurrent_requests == Some(0) {
            return Err(ConfigError::Invalid(
                "server.max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.ui.default_language.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ui.default_language must not be empty".into(),
            ));
        }
        Ok(())
    }
}
